//! Cumulative histogram over the full 16-bit depth domain.

use thiserror::Error;

/// Number of distinct 16-bit depth values.
pub const DEPTH_BINS: usize = 0x10000;

/// First index the cumulative pass accumulates into. Index 1 keeps its raw
/// frequency and index 0 (invalid depth) is never folded into the totals.
const CUMULATIVE_START: usize = 2;

#[derive(Error, Debug)]
pub enum HistogramError {
    #[error("frame has {0} samples; 32-bit counters support at most {max}", max = u32::MAX)]
    TooManySamples(usize),
}

/// Cumulative depth histogram for a single frame.
///
/// After [`build`](Self::build), `get(v)` is the number of non-zero samples
/// with value `<= v` for every `v >= 2`, and [`total`](Self::total) is the
/// number of non-zero samples in the frame.
#[derive(Clone, PartialEq, Eq)]
pub struct DepthHistogram {
    counts: Vec<u32>,
}

impl DepthHistogram {
    /// Count every sample, then convert the frequencies to cumulative counts.
    ///
    /// Frames larger than `u32::MAX` samples are rejected so no counter can wrap.
    pub fn build(samples: &[u16]) -> Result<Self, HistogramError> {
        if samples.len() > u32::MAX as usize {
            return Err(HistogramError::TooManySamples(samples.len()));
        }

        let mut counts = vec![0u32; DEPTH_BINS];
        for &d in samples {
            counts[d as usize] += 1;
        }

        for i in CUMULATIVE_START..DEPTH_BINS {
            counts[i] += counts[i - 1];
        }

        Ok(Self { counts })
    }

    /// Cumulative count at depth `value`.
    pub fn get(&self, value: u16) -> u32 {
        self.counts[value as usize]
    }

    /// Count at the top of the depth domain (`Histogram[65535]`).
    pub fn total(&self) -> u32 {
        self.counts[DEPTH_BINS - 1]
    }

    /// Number of invalid (zero) samples in the frame.
    pub fn invalid(&self) -> u32 {
        self.counts[0]
    }

    /// All 65536 cumulative bins.
    pub fn as_slice(&self) -> &[u32] {
        &self.counts
    }
}

impl std::fmt::Debug for DepthHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthHistogram")
            .field("total", &self.total())
            .field("invalid", &self.invalid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_two_sample_scenario() {
        let hist = DepthHistogram::build(&[100, 200]).unwrap();
        assert_eq!(hist.get(99), 0);
        assert_eq!(hist.get(100), 1);
        assert_eq!(hist.get(150), 1);
        assert_eq!(hist.get(200), 2);
        assert_eq!(hist.total(), 2);
    }

    #[test]
    fn test_index_one_keeps_raw_frequency() {
        let hist = DepthHistogram::build(&[1, 1, 2, 5]).unwrap();
        assert_eq!(hist.get(1), 2);
        // Index 2 accumulates index 1
        assert_eq!(hist.get(2), 3);
        assert_eq!(hist.get(5), 4);
        assert_eq!(hist.total(), 4);
    }

    #[test]
    fn test_invalid_samples_stay_at_index_zero() {
        let hist = DepthHistogram::build(&[0, 0, 0, 300]).unwrap();
        assert_eq!(hist.invalid(), 3);
        assert_eq!(hist.get(2), 0);
        assert_eq!(hist.total(), 1);
    }

    #[test]
    fn test_all_invalid_frame() {
        let hist = DepthHistogram::build(&[0; 16]).unwrap();
        assert_eq!(hist.total(), 0);
        assert_eq!(hist.invalid(), 16);
    }

    #[test]
    fn test_empty_frame() {
        let hist = DepthHistogram::build(&[]).unwrap();
        assert!(hist.as_slice().iter().all(|&c| c == 0));
        assert_eq!(hist.as_slice().len(), DEPTH_BINS);
    }

    #[test]
    fn test_max_depth_value_counted() {
        let hist = DepthHistogram::build(&[u16::MAX, 7]).unwrap();
        assert_eq!(hist.get(u16::MAX - 1), 1);
        assert_eq!(hist.total(), 2);
    }

    #[test]
    fn test_random_frames_monotone_and_mass_conserved() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let len = rng.gen_range(1..5000);
            let samples: Vec<u16> = (0..len)
                .map(|_| if rng.gen_bool(0.1) { 0 } else { rng.gen() })
                .collect();
            let hist = DepthHistogram::build(&samples).unwrap();
            let counts = hist.as_slice();

            for i in CUMULATIVE_START + 1..DEPTH_BINS {
                assert!(counts[i] >= counts[i - 1], "decrease at {i}");
            }

            let zeros = samples.iter().filter(|&&d| d == 0).count() as u32;
            assert_eq!(hist.invalid(), zeros);
            assert_eq!(hist.total() + hist.invalid(), samples.len() as u32);
        }
    }

    #[test]
    fn test_cumulative_count_matches_definition() {
        let samples = [3u16, 9, 9, 40, 2, 0, 65535, 1000];
        let hist = DepthHistogram::build(&samples).unwrap();
        for v in [2u16, 3, 8, 9, 39, 40, 999, 1000, 65534, 65535] {
            let expected = samples.iter().filter(|&&d| d != 0 && d <= v).count() as u32;
            assert_eq!(hist.get(v), expected, "value {v}");
        }
    }
}
