//! One acquisition cycle: wait for a frame set, copy color, equalize depth.

use crate::colorize::colorize_frame;
use crate::histogram::{DepthHistogram, HistogramError};
use depthview_hw::{CameraError, DepthCamera, DepthFrame, DisplayImage, FrameError, Stream};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("histogram error: {0}")]
    Histogram(#[from] HistogramError),
}

/// Valid-sample statistics of the depth frame behind a [`FramePair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepthSummary {
    pub pixels: usize,
    pub valid: usize,
    /// Nearest and farthest valid sample, in depth units.
    pub range: Option<(u16, u16)>,
}

impl DepthSummary {
    pub fn of(frame: &DepthFrame) -> Self {
        Self {
            pixels: frame.pixel_count(),
            valid: frame.valid_count(),
            range: frame.valid_range(),
        }
    }

    /// Range converted to meters with the camera's depth scale.
    pub fn range_meters(&self, depth_scale: f32) -> Option<(f32, f32)> {
        self.range
            .map(|(lo, hi)| (lo as f32 * depth_scale, hi as f32 * depth_scale))
    }
}

/// Display buffers produced by one cycle.
#[derive(Debug, Clone)]
pub struct FramePair {
    pub color: DisplayImage,
    pub depth: DisplayImage,
    pub summary: DepthSummary,
}

impl FramePair {
    /// Write `color-NNNN.png` and `depth-NNNN.png` into `dir`.
    pub fn save_png(&self, dir: &Path, sequence: u64) -> Result<[PathBuf; 2], FrameError> {
        let color = dir.join(format!("color-{sequence:04}.png"));
        let depth = dir.join(format!("depth-{sequence:04}.png"));
        self.color.save_png(&color)?;
        self.depth.save_png(&depth)?;
        Ok([color, depth])
    }
}

/// Run one full cycle against `camera`.
///
/// Intrinsics are re-read every cycle. Camera buffers are copied out before
/// returning; nothing is retained between cycles.
pub fn run_cycle<C: DepthCamera + ?Sized>(camera: &mut C) -> Result<FramePair, CycleError> {
    camera.wait_all_streams()?;
    let started = Instant::now();

    let color_intr = camera.stream_intrinsics(Stream::Color)?;
    let color = camera.image_pixels(Stream::Color)?.copy_color(color_intr)?;

    let depth_intr = camera.stream_intrinsics(Stream::Depth)?;
    let depth_frame = camera.image_pixels(Stream::Depth)?.copy_depth(depth_intr)?;
    let depth = equalize_depth(&depth_frame)?;
    let summary = DepthSummary::of(&depth_frame);

    tracing::debug!(
        color_width = color_intr.width,
        color_height = color_intr.height,
        depth_width = depth_intr.width,
        depth_height = depth_intr.height,
        valid = summary.valid,
        process_us = started.elapsed().as_micros() as u64,
        "cycle complete"
    );

    Ok(FramePair {
        color,
        depth,
        summary,
    })
}

/// Histogram-equalize a depth frame into a display image.
pub fn equalize_depth(frame: &DepthFrame) -> Result<DisplayImage, CycleError> {
    let hist = DepthHistogram::build(&frame.samples)?;
    Ok(colorize_frame(frame, &hist)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthview_hw::{Intrinsics, PixelFormat, RawFrame, SyntheticCamera};

    /// Camera serving fixed buffers, with optional geometry changes between waits.
    struct FixedCamera {
        waits: usize,
        fail_wait: bool,
        depth: Vec<u8>,
        depth_intr: Intrinsics,
        color: Vec<u8>,
        color_intr: Intrinsics,
    }

    impl FixedCamera {
        fn new(depth_samples: &[u16], width: u32, height: u32) -> Self {
            Self {
                waits: 0,
                fail_wait: false,
                depth: depth_samples.iter().flat_map(|d| d.to_le_bytes()).collect(),
                depth_intr: Intrinsics { width, height },
                color: vec![9; 3],
                color_intr: Intrinsics {
                    width: 1,
                    height: 1,
                },
            }
        }
    }

    impl DepthCamera for FixedCamera {
        fn name(&self) -> &str {
            "fixed"
        }

        fn stream_intrinsics(&self, stream: Stream) -> Result<Intrinsics, CameraError> {
            Ok(match stream {
                Stream::Color => self.color_intr,
                Stream::Depth => self.depth_intr,
            })
        }

        fn wait_all_streams(&mut self) -> Result<(), CameraError> {
            if self.fail_wait {
                return Err(CameraError::Call {
                    function: "wait_all_streams",
                    args: String::new(),
                    message: "device unplugged".into(),
                });
            }
            self.waits += 1;
            Ok(())
        }

        fn image_pixels(&self, stream: Stream) -> Result<RawFrame<'_>, CameraError> {
            Ok(match stream {
                Stream::Color => RawFrame::new(&self.color, PixelFormat::Bgr8, 3),
                Stream::Depth => RawFrame::new(
                    &self.depth,
                    PixelFormat::Z16,
                    self.depth_intr.width as usize * 2,
                ),
            })
        }

        fn depth_scale(&self) -> f32 {
            0.001
        }
    }

    #[test]
    fn test_cycle_two_sample_scenario() {
        let mut cam = FixedCamera::new(&[100, 200], 2, 1);
        let pair = run_cycle(&mut cam).unwrap();
        assert_eq!(cam.waits, 1);
        assert_eq!(pair.color.as_bytes(), &[9, 9, 9]);
        assert_eq!(pair.depth.as_bytes(), &[128, 0, 127, 0, 0, 255]);
        assert_eq!(
            pair.summary,
            DepthSummary {
                pixels: 2,
                valid: 2,
                range: Some((100, 200)),
            }
        );
    }

    #[test]
    fn test_summary_range_in_meters() {
        let summary = DepthSummary {
            pixels: 4,
            valid: 3,
            range: Some((500, 2000)),
        };
        let (near, far) = summary.range_meters(0.001).unwrap();
        assert!((near - 0.5).abs() < 1e-6);
        assert!((far - 2.0).abs() < 1e-6);
        assert_eq!(DepthSummary::default().range_meters(0.001), None);
    }

    #[test]
    fn test_save_png_writes_both_streams() {
        let tmp = tempfile::tempdir().expect("failed to create tempdir");
        let dir = tmp.path();

        let mut cam = FixedCamera::new(&[0, 300, 600, 900], 2, 2);
        let pair = run_cycle(&mut cam).unwrap();
        let [color, depth] = pair.save_png(dir, 7).unwrap();

        assert!(color.ends_with("color-0007.png"));
        let decoded = image::open(&depth).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (2, 2));
        // Invalid sample written as RGB (20, 5, 0)
        assert_eq!(decoded.get_pixel(0, 0).0, [20, 5, 0]);
    }

    #[test]
    fn test_cycle_propagates_camera_fault() {
        let mut cam = FixedCamera::new(&[1], 1, 1);
        cam.fail_wait = true;
        let err = run_cycle(&mut cam).unwrap_err();
        assert!(matches!(err, CycleError::Camera(CameraError::Call { .. })));
        assert!(err.to_string().contains("wait_all_streams"));
    }

    #[test]
    fn test_cycle_rereads_intrinsics() {
        let mut cam = FixedCamera::new(&[5, 6, 7, 8], 4, 1);
        let wide = run_cycle(&mut cam).unwrap();
        assert_eq!((wide.depth.width(), wide.depth.height()), (4, 1));

        cam.depth_intr = Intrinsics {
            width: 2,
            height: 2,
        };
        let square = run_cycle(&mut cam).unwrap();
        assert_eq!((square.depth.width(), square.depth.height()), (2, 2));
    }

    #[test]
    fn test_cycle_short_depth_buffer_is_frame_error() {
        let mut cam = FixedCamera::new(&[5, 6], 2, 1);
        cam.depth_intr = Intrinsics {
            width: 2,
            height: 2,
        };
        assert!(matches!(run_cycle(&mut cam), Err(CycleError::Frame(_))));
    }

    #[test]
    fn test_cycle_with_synthetic_camera() {
        let mut cam = SyntheticCamera::new(
            Intrinsics {
                width: 32,
                height: 24,
            },
            Intrinsics {
                width: 40,
                height: 30,
            },
        );
        let pair = run_cycle(&mut cam).unwrap();
        assert_eq!(pair.color.as_bytes().len(), 32 * 24 * 3);
        assert_eq!(pair.depth.stride(), 40 * 3);
        // Border samples are invalid
        assert_eq!(pair.depth.pixel(0, 0), Some([0, 5, 20]));
    }

    #[test]
    fn test_cycle_output_is_idempotent_for_frozen_frame() {
        let samples: Vec<u16> = (0..64).map(|i| (i * 37 % 500) as u16).collect();
        let mut cam = FixedCamera::new(&samples, 8, 8);
        let first = run_cycle(&mut cam).unwrap();
        let second = run_cycle(&mut cam).unwrap();
        assert_eq!(first.depth.as_bytes(), second.depth.as_bytes());
        assert_eq!(first.color.as_bytes(), second.color.as_bytes());
    }
}
