//! Output writing
//!
//! - [`StreamWriter`] owns one recording's output and enforces the
//!   configure / append / finalize / abort contract
//! - [`ContainerMuxer`] is the encoder/muxer seam: [`FfmpegMuxer`] encodes
//!   MP4, [`TimedContainerMuxer`] keeps raw timed samples
//! - [`EncoderSettings`] describe each track's encoder

pub mod ffmpeg;
pub mod muxer;
pub mod settings;
pub mod stream;

pub use ffmpeg::{FfmpegMuxer, MP4_EXTENSION};
pub use muxer::{read_index, read_samples, ContainerIndex, ContainerMuxer, TimedContainerMuxer};
pub use settings::{AudioSettings, EncoderSettings, VideoSettings, VideoTransform};
pub use stream::{AbortReport, FinalizeJob, OutputDescriptor, StreamWriter, WriterStatus};
