//! Generated color + depth scene for running without hardware.
//!
//! The depth stream is a horizontal ramp that scrolls one column per frame,
//! framed by a border of invalid (zero) samples. The color stream is a BGR
//! gradient with a per-frame red offset, laid out with 4-byte aligned rows
//! the way many drivers pad BGR24 buffers.

use crate::camera::{CameraError, DepthCamera, Intrinsics, PixelFormat, Stream, StreamConfig};
use crate::frame::RawFrame;
use std::time::{Duration, Instant};

/// Width in pixels of the invalid-depth border.
pub const INVALID_BORDER: u32 = 4;

/// Nearest and farthest generated depth, in depth units.
pub const NEAR_DEPTH: u16 = 500;
pub const FAR_DEPTH: u16 = 4500;

pub struct SyntheticCamera {
    color: Intrinsics,
    depth: Intrinsics,
    depth_scale: f32,
    frame_interval: Option<Duration>,
    last_frame: Option<Instant>,
    sequence: u64,
    color_buf: Vec<u8>,
    depth_buf: Vec<u8>,
}

impl SyntheticCamera {
    pub fn new(color: Intrinsics, depth: Intrinsics) -> Self {
        Self {
            color,
            depth,
            depth_scale: 0.001,
            frame_interval: None,
            last_frame: None,
            sequence: 0,
            color_buf: Vec::new(),
            depth_buf: Vec::new(),
        }
    }

    /// Build a camera with the geometry a real device would negotiate for `config`.
    pub fn from_config(config: &StreamConfig) -> Self {
        let (depth_width, depth_height, depth_fps) = config.depth_preset.depth_mode();
        let mut camera = Self::new(
            Intrinsics {
                width: config.color_width,
                height: config.color_height,
            },
            Intrinsics {
                width: depth_width,
                height: depth_height,
            },
        );
        camera.depth_scale = config.depth_scale;
        let fps = config.color_fps.min(depth_fps).max(1);
        camera.frame_interval = Some(Duration::from_secs(1) / fps);
        camera
    }

    /// Emulate sensor cadence: `wait_all_streams()` returns no sooner than
    /// `interval` after the previous frame set.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Number of frame sets produced so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn color_stride(&self) -> usize {
        (self.color.width as usize * 3 + 3) & !3
    }

    fn render(&mut self) {
        let seq = self.sequence;

        let (w, h) = (self.depth.width, self.depth.height);
        self.depth_buf.clear();
        self.depth_buf.reserve(self.depth.pixel_count() * 2);
        for y in 0..h {
            for x in 0..w {
                let border = x < INVALID_BORDER
                    || y < INVALID_BORDER
                    || x + INVALID_BORDER >= w
                    || y + INVALID_BORDER >= h;
                let d = if border {
                    0
                } else {
                    let col = (x as u64 + seq) % w as u64;
                    let span = (FAR_DEPTH - NEAR_DEPTH) as u64;
                    NEAR_DEPTH + (col * span / w as u64) as u16
                };
                self.depth_buf.extend_from_slice(&d.to_le_bytes());
            }
        }

        let (w, h) = (self.color.width, self.color.height);
        let stride = self.color_stride();
        self.color_buf.clear();
        self.color_buf.resize(stride * h as usize, 0);
        let red = (seq.wrapping_mul(8) % 256) as u8;
        for y in 0..h {
            let row = &mut self.color_buf[y as usize * stride..];
            for x in 0..w {
                let i = x as usize * 3;
                row[i] = (x * 255 / w.max(1)) as u8;
                row[i + 1] = (y * 255 / h.max(1)) as u8;
                row[i + 2] = red;
            }
        }
    }
}

impl DepthCamera for SyntheticCamera {
    fn name(&self) -> &str {
        "Synthetic Depth Camera"
    }

    fn stream_intrinsics(&self, stream: Stream) -> Result<Intrinsics, CameraError> {
        Ok(match stream {
            Stream::Color => self.color,
            Stream::Depth => self.depth,
        })
    }

    fn wait_all_streams(&mut self) -> Result<(), CameraError> {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.render();
        self.sequence += 1;
        self.last_frame = Some(Instant::now());
        Ok(())
    }

    fn image_pixels(&self, stream: Stream) -> Result<RawFrame<'_>, CameraError> {
        if self.sequence == 0 {
            return Err(CameraError::NoFrame(stream));
        }
        Ok(match stream {
            Stream::Color => RawFrame::new(&self.color_buf, PixelFormat::Bgr8, self.color_stride()),
            Stream::Depth => RawFrame::new(
                &self.depth_buf,
                PixelFormat::Z16,
                self.depth.width as usize * 2,
            ),
        })
    }

    fn depth_scale(&self) -> f32 {
        self.depth_scale
    }
}
