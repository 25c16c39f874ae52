//! Output geometry
//!
//! Maps the configured output format onto the device's native frame size and
//! reports the centered crop ("clean aperture") the preview renderer applies.

use crate::config::OutputFormat;
use serde::{Deserialize, Serialize};

/// Frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Horizontal pixels
    pub width: u32,
    /// Vertical pixels
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Point in view or device coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal coordinate
    pub x: f64,
    /// Vertical coordinate
    pub y: f64,
}

/// Encoded output size and the crop that produces it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputGeometry {
    /// Requested aspect
    pub format: OutputFormat,
    /// Native camera frame size
    pub source: Dimensions,
    /// Encoded frame size
    pub output: Dimensions,
    /// Region of the source frame kept in the output
    pub clean_aperture: Rect,
}

impl OutputGeometry {
    /// Compute the output size for `format` from the native frame size
    ///
    /// Sizes are rounded down to even values since most encoders reject odd
    /// dimensions for 4:2:0 chroma.
    pub fn compute(format: OutputFormat, source: Dimensions) -> Self {
        let (w, h) = (source.width, source.height);
        let output = match format {
            OutputFormat::Preset => Dimensions::new(w, h),
            OutputFormat::Square => {
                let side = w.min(h);
                Dimensions::new(side, side)
            }
            OutputFormat::Widescreen => fit_aspect(w, h, 16, 9),
            OutputFormat::Standard => fit_aspect(w, h, 4, 3),
        };
        let output = Dimensions::new(output.width & !1, output.height & !1);

        let clean_aperture = Rect::new(
            (w.saturating_sub(output.width)) as f64 / 2.0,
            (h.saturating_sub(output.height)) as f64 / 2.0,
            output.width as f64,
            output.height as f64,
        );

        Self {
            format,
            source,
            output,
            clean_aperture,
        }
    }
}

/// Largest `aw:ah` rectangle that fits in `w x h`
fn fit_aspect(w: u32, h: u32, aw: u32, ah: u32) -> Dimensions {
    let w64 = w as u64;
    let h64 = h as u64;
    if w64 * ah as u64 >= h64 * aw as u64 {
        // source is wider than the target aspect
        Dimensions::new((h64 * aw as u64 / ah as u64) as u32, h)
    } else {
        Dimensions::new(w, (w64 * ah as u64 / aw as u64) as u32)
    }
}

/// Convert a tap in view coordinates into the device's normalized
/// point-of-interest space (landscape, origin top-left, 0..1)
pub fn point_of_interest(view_point: Point, frame: Rect) -> Point {
    if frame.width <= 0.0 || frame.height <= 0.0 {
        return Point { x: 0.5, y: 0.5 };
    }
    let x = ((view_point.y - frame.y) / frame.height).clamp(0.0, 1.0);
    let y = (1.0 - (view_point.x - frame.x) / frame.width).clamp(0.0, 1.0);
    Point { x, y }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HD: Dimensions = Dimensions::new(1920, 1080);

    #[test]
    fn test_square_uses_short_side() {
        let geometry = OutputGeometry::compute(OutputFormat::Square, HD);
        assert_eq!(geometry.output, Dimensions::new(1080, 1080));
        assert_eq!(geometry.clean_aperture, Rect::new(420.0, 0.0, 1080.0, 1080.0));
    }

    #[test]
    fn test_standard_crops_width() {
        let geometry = OutputGeometry::compute(OutputFormat::Standard, HD);
        assert_eq!(geometry.output, Dimensions::new(1440, 1080));
    }

    #[test]
    fn test_widescreen_crops_height_of_4_3_source() {
        let geometry = OutputGeometry::compute(OutputFormat::Widescreen, Dimensions::new(640, 480));
        assert_eq!(geometry.output, Dimensions::new(640, 360));
        assert_eq!(geometry.clean_aperture.y, 60.0);
    }

    #[test]
    fn test_preset_keeps_native_size() {
        let geometry = OutputGeometry::compute(OutputFormat::Preset, HD);
        assert_eq!(geometry.output, HD);
        assert_eq!(geometry.clean_aperture, Rect::new(0.0, 0.0, 1920.0, 1080.0));
    }

    #[test]
    fn test_point_of_interest_center() {
        let frame = Rect::new(0.0, 0.0, 320.0, 480.0);
        let poi = point_of_interest(Point { x: 160.0, y: 240.0 }, frame);
        assert_eq!(poi, Point { x: 0.5, y: 0.5 });
    }
}
