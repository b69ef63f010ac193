//! Frame buffers: borrowed camera views, owned depth frames and packed BGR display images.

use crate::camera::{Intrinsics, PixelFormat};
use std::path::Path;
use std::sync::Arc;

/// Bytes per pixel of every [`DisplayImage`] (24-bit BGR, no alpha).
pub const BYTES_PER_PIXEL: usize = 3;

/// A camera-owned pixel buffer, valid until the next `wait_all_streams()` call.
///
/// The view borrows the camera, so it cannot outlive the cycle that produced it.
/// Pixel data is only reachable through the `copy_*` functions, which always
/// return owned buffers.
pub struct RawFrame<'a> {
    data: &'a [u8],
    format: PixelFormat,
    stride: usize,
}

impl<'a> RawFrame<'a> {
    /// Wrap a backend buffer. `stride` is the byte distance between row starts.
    pub fn new(data: &'a [u8], format: PixelFormat, stride: usize) -> Self {
        Self {
            data,
            format,
            stride,
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Copy a color frame into a packed BGR [`DisplayImage`].
    ///
    /// `Bgr8` rows are copied byte-for-byte; `Yuyv` rows are converted.
    pub fn copy_color(&self, intrinsics: Intrinsics) -> Result<DisplayImage, FrameError> {
        let width = intrinsics.width as usize;
        let row_bytes = width * self.format.bytes_per_pixel();
        let mut bgr = Vec::with_capacity(intrinsics.pixel_count() * BYTES_PER_PIXEL);

        match self.format {
            PixelFormat::Bgr8 => {
                for row in self.rows(row_bytes, intrinsics.height)? {
                    bgr.extend_from_slice(row);
                }
            }
            PixelFormat::Yuyv => {
                for row in self.rows(row_bytes, intrinsics.height)? {
                    yuyv_row_to_bgr(row, width, &mut bgr);
                }
            }
            PixelFormat::Z16 => {
                return Err(FrameError::UnsupportedFormat {
                    format: self.format,
                    expected: "color",
                })
            }
        }

        DisplayImage::from_bgr(intrinsics.width, intrinsics.height, bgr)
    }

    /// Copy a `Z16` depth frame into an owned [`DepthFrame`].
    pub fn copy_depth(&self, intrinsics: Intrinsics) -> Result<DepthFrame, FrameError> {
        if self.format != PixelFormat::Z16 {
            return Err(FrameError::UnsupportedFormat {
                format: self.format,
                expected: "depth",
            });
        }

        let row_bytes = intrinsics.width as usize * self.format.bytes_per_pixel();
        let mut samples = Vec::with_capacity(intrinsics.pixel_count());
        for row in self.rows(row_bytes, intrinsics.height)? {
            samples.extend(
                row.chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]])),
            );
        }

        DepthFrame::new(intrinsics.width, intrinsics.height, samples)
    }

    /// Iterate `height` rows of `row_bytes` each, skipping stride padding.
    fn rows(
        &self,
        row_bytes: usize,
        height: u32,
    ) -> Result<impl Iterator<Item = &'a [u8]> + 'a, FrameError> {
        let height = height as usize;
        let stride = self.stride;
        if stride < row_bytes {
            return Err(FrameError::StrideTooSmall { stride, row_bytes });
        }

        let expected = match height {
            0 => 0,
            h => stride * (h - 1) + row_bytes,
        };
        if self.data.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }

        let data = self.data;
        Ok((0..height).map(move |y| &data[y * stride..y * stride + row_bytes]))
    }
}

/// Convert one packed YUYV row to BGR using the BT.601 integer approximation.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]. An odd trailing pixel
/// has no V sample and uses neutral chroma.
fn yuyv_row_to_bgr(row: &[u8], width: usize, out: &mut Vec<u8>) {
    for x in 0..width {
        let base = (x / 2) * 4;
        let y = row[x * 2] as i32 - 16;
        let u = row[base + 1] as i32 - 128;
        let v = row.get(base + 3).copied().unwrap_or(128) as i32 - 128;

        let r = (298 * y + 409 * v + 128) >> 8;
        let g = (298 * y - 100 * u - 208 * v + 128) >> 8;
        let b = (298 * y + 516 * u + 128) >> 8;

        out.push(b.clamp(0, 255) as u8);
        out.push(g.clamp(0, 255) as u8);
        out.push(r.clamp(0, 255) as u8);
    }
}

/// An owned depth frame copied out of a camera buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthFrame {
    pub width: u32,
    pub height: u32,
    /// Raw 16-bit depth samples, row-major. `0` marks "no return".
    pub samples: Vec<u16>,
}

impl DepthFrame {
    pub fn new(width: u32, height: u32, samples: Vec<u16>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.samples.len()
    }

    /// Number of samples carrying a valid (non-zero) depth.
    pub fn valid_count(&self) -> usize {
        self.samples.iter().filter(|&&d| d != 0).count()
    }

    /// Smallest and largest valid depth, or `None` when every sample is invalid.
    pub fn valid_range(&self) -> Option<(u16, u16)> {
        self.samples
            .iter()
            .filter(|&&d| d != 0)
            .fold(None, |acc, &d| match acc {
                None => Some((d, d)),
                Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
            })
    }
}

/// A packed 24-bit BGR image ready for presentation.
///
/// Stride is exactly `width * 3`. The pixel buffer is shared and immutable,
/// so clones handed to a presentation layer stay valid for as long as it
/// holds them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayImage {
    width: u32,
    height: u32,
    data: Arc<[u8]>,
}

impl DisplayImage {
    /// Take ownership of a freshly synthesized BGR buffer.
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data: Arc::from(data.into_boxed_slice()),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// BGR triple at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y as usize * self.stride() + x as usize * BYTES_PER_PIXEL;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }

    /// Convert to an RGB-ordered `image` buffer for encoding.
    pub fn to_rgb_image(&self) -> image::RgbImage {
        image::RgbImage::from_fn(self.width, self.height, |x, y| {
            let i = y as usize * self.stride() + x as usize * BYTES_PER_PIXEL;
            image::Rgb([self.data[i + 2], self.data[i + 1], self.data[i]])
        })
    }

    /// Encode as PNG at `path`.
    pub fn save_png(&self, path: &Path) -> Result<(), FrameError> {
        self.to_rgb_image()
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("stride {stride} is smaller than a packed row of {row_bytes} bytes")]
    StrideTooSmall { stride: usize, row_bytes: usize },
    #[error("pixel format {format:?} cannot be read as a {expected} frame")]
    UnsupportedFormat {
        format: PixelFormat,
        expected: &'static str,
    },
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}
