//! Capture-side types
//!
//! Frames, the frame source adapter, output geometry, and the traits through
//! which the hardware and still-image collaborators are consumed.

pub mod frame;
pub mod geometry;
pub mod source;
pub mod traits;

pub use frame::{Frame, Track};
pub use geometry::{Dimensions, OutputGeometry, Point, Rect};
pub use source::{AudioFormat, FrameFeed, FrameSource};
pub use traits::{
    AuthorizationStatus, CameraCapabilities, CaptureDevice, DeviceCapabilities, DeviceEvent, PhotoRequest,
    PhotoResult, StillImageCapture,
};
