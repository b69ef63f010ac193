//! depthview-core: Depth equalization pipeline.
//!
//! Builds a cumulative histogram over the 16-bit depth domain, colorizes
//! each sample by its rank in that histogram, and paces acquisition cycles
//! against a `DepthCamera`.

pub mod colorize;
pub mod histogram;
pub mod pacer;
pub mod pipeline;

pub use colorize::{colorize_frame, colorize_sample, ColorPixel, INVALID_DEPTH_COLOR};
pub use histogram::{DepthHistogram, HistogramError};
pub use pacer::{FramePacer, PacerHandle, PacerStats, TickOutcome};
pub use pipeline::{equalize_depth, run_cycle, CycleError, DepthSummary, FramePair};
