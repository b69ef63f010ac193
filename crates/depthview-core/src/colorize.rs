//! Histogram-equalized depth colorization.
//!
//! Each valid sample is normalized by its cumulative rank in the frame, so the
//! gradient spreads over whatever depth range the scene actually contains:
//! near samples trend blue, far samples trend red.

use crate::histogram::DepthHistogram;
use depthview_hw::frame::BYTES_PER_PIXEL;
use depthview_hw::{DepthFrame, DisplayImage, FrameError};

/// One BGR output pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorPixel {
    pub blue: u8,
    pub green: u8,
    pub red: u8,
}

impl ColorPixel {
    /// Bytes in display order.
    pub fn to_bgr(self) -> [u8; 3] {
        [self.blue, self.green, self.red]
    }
}

/// Marks samples with no depth return.
pub const INVALID_DEPTH_COLOR: ColorPixel = ColorPixel {
    blue: 0,
    green: 5,
    red: 20,
};

/// Equalized level `f` in `[0, 255]` for a valid sample, `None` for depth 0.
///
/// `f = hist[d] * 255 / hist.total()` with truncating division. The product
/// is widened to 64 bits before dividing.
pub fn equalization_level(depth: u16, hist: &DepthHistogram) -> Option<u8> {
    if depth == 0 {
        return None;
    }
    let total = u64::from(hist.total()).max(1);
    let level = u64::from(hist.get(depth)) * 255 / total;
    debug_assert!(level <= 255, "hist[{depth}] exceeds histogram total");
    Some(level as u8)
}

/// Color for a single depth sample.
pub fn colorize_sample(depth: u16, hist: &DepthHistogram) -> ColorPixel {
    match equalization_level(depth, hist) {
        None => INVALID_DEPTH_COLOR,
        Some(f) => ColorPixel {
            blue: 255 - f,
            green: 0,
            red: f,
        },
    }
}

/// Colorize every sample of `frame` into a packed BGR image.
pub fn colorize_frame(
    frame: &DepthFrame,
    hist: &DepthHistogram,
) -> Result<DisplayImage, FrameError> {
    let mut bgr = Vec::with_capacity(frame.pixel_count() * BYTES_PER_PIXEL);
    for &d in &frame.samples {
        bgr.extend_from_slice(&colorize_sample(d, hist).to_bgr());
    }
    DisplayImage::from_bgr(frame.width, frame.height, bgr)
}
