//! Frame pacer: drives one cycle per tick, never two at once.
//!
//! The pacer is either idle or running. A tick that arrives while a cycle is
//! still running is a no-op. The running flag is cleared by a guard, so the
//! pacer re-arms after a cycle returns an error or panics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Default tick interval (~60 Hz ceiling).
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(16);

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ran,
    /// A cycle was already in flight.
    Skipped,
}

/// Counters returned when [`FramePacer::run`] stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PacerStats {
    pub cycles: u64,
    pub skipped: u64,
}

struct Shared {
    running: AtomicBool,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Shared {
    fn stop_requested(&self) -> bool {
        self.stopped.lock().map(|s| *s).unwrap_or(true)
    }

    /// Sleep for `duration`, returning early if a stop is requested.
    fn sleep(&self, duration: Duration) {
        let Ok(guard) = self.stopped.lock() else {
            return;
        };
        let _ = self.wake.wait_timeout_while(guard, duration, |stopped| !*stopped);
    }
}

/// Returns the pacer to idle when the cycle scope ends, including on unwind.
struct RearmGuard<'a>(&'a AtomicBool);

impl Drop for RearmGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cloneable handle for stopping a pacer from another thread.
#[derive(Clone)]
pub struct PacerHandle {
    shared: Arc<Shared>,
}

impl PacerHandle {
    /// Request the run loop to exit after the in-flight cycle, if any.
    pub fn stop(&self) {
        if let Ok(mut stopped) = self.shared.stopped.lock() {
            *stopped = true;
        }
        self.shared.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stop_requested()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

pub struct FramePacer {
    interval: Duration,
    shared: Arc<Shared>,
}

impl FramePacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                stopped: Mutex::new(false),
                wake: Condvar::new(),
            }),
        }
    }

    /// Wait between the end of one cycle and the next tick.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn handle(&self) -> PacerHandle {
        PacerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Run `cycle` unless one is already in flight.
    ///
    /// Errors from `cycle` are returned unchanged; the pacer is idle again
    /// either way.
    pub fn tick<F, E>(&self, cycle: F) -> Result<TickOutcome, E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("tick skipped, cycle in flight");
            return Ok(TickOutcome::Skipped);
        }
        let _rearm = RearmGuard(&self.shared.running);

        cycle()?;
        Ok(TickOutcome::Ran)
    }

    /// Tick until stopped, waiting one interval after each cycle completes.
    ///
    /// The first error from `cycle` ends the loop and is returned to the caller.
    pub fn run<F, E>(&self, mut cycle: F) -> Result<PacerStats, E>
    where
        F: FnMut() -> Result<(), E>,
    {
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "pacer started");
        let mut stats = PacerStats::default();

        while !self.shared.stop_requested() {
            match self.tick(&mut cycle)? {
                TickOutcome::Ran => stats.cycles += 1,
                TickOutcome::Skipped => stats.skipped += 1,
            }
            self.shared.sleep(self.interval);
        }

        tracing::debug!(cycles = stats.cycles, skipped = stats.skipped, "pacer stopped");
        Ok(stats)
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::time::Instant;

    #[test]
    fn test_tick_runs_and_rearms() {
        let pacer = FramePacer::default();
        let outcome = pacer.tick(|| Ok::<_, ()>(())).unwrap();
        assert_eq!(outcome, TickOutcome::Ran);
        assert!(!pacer.is_running());
    }

    #[test]
    fn test_nested_tick_is_skipped() {
        let pacer = FramePacer::default();
        let mut inner = None;
        pacer
            .tick(|| {
                assert!(pacer.is_running());
                inner = Some(pacer.tick(|| Ok::<_, ()>(())).unwrap());
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(inner, Some(TickOutcome::Skipped));
    }

    #[test]
    fn test_rearms_after_error() {
        let pacer = FramePacer::default();
        let result = pacer.tick(|| Err::<(), _>("camera fault"));
        assert_eq!(result, Err("camera fault"));
        assert!(!pacer.is_running());
        assert_eq!(pacer.tick(|| Ok::<_, ()>(())), Ok(TickOutcome::Ran));
    }

    #[test]
    fn test_rearms_after_panic() {
        let pacer = FramePacer::default();
        let result = catch_unwind(AssertUnwindSafe(|| {
            pacer.tick(|| -> Result<(), ()> { panic!("cycle panicked") })
        }));
        assert!(result.is_err());
        assert!(!pacer.is_running());
    }

    #[test]
    fn test_run_until_stopped() {
        let pacer = FramePacer::new(Duration::from_millis(1));
        let handle = pacer.handle();
        let mut count = 0;
        let stats = pacer
            .run(|| {
                count += 1;
                if count == 3 {
                    handle.stop();
                }
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.skipped, 0);
        assert!(handle.is_stopped());
    }

    #[test]
    fn test_run_propagates_first_error() {
        let pacer = FramePacer::new(Duration::from_millis(1));
        let mut count = 0;
        let result = pacer.run(|| {
            count += 1;
            if count == 2 {
                Err("lost device")
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err("lost device"));
        assert_eq!(count, 2);
        assert!(!pacer.is_running());
    }

    #[test]
    fn test_interval_bounds_rate() {
        let pacer = FramePacer::new(Duration::from_millis(10));
        let handle = pacer.handle();
        let mut count = 0;
        let start = Instant::now();
        pacer
            .run(|| {
                count += 1;
                if count == 5 {
                    handle.stop();
                }
                Ok::<_, ()>(())
            })
            .unwrap();
        // Four full intervals separate five cycles
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_stop_from_other_thread_wakes_sleep() {
        let pacer = FramePacer::new(Duration::from_secs(60));
        let handle = pacer.handle();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.stop();
        });
        let start = Instant::now();
        let stats = pacer.run(|| Ok::<_, ()>(())).unwrap();
        stopper.join().unwrap();
        assert!(stats.cycles <= 1);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_stopped_pacer_does_not_tick() {
        let pacer = FramePacer::default();
        pacer.handle().stop();
        let stats = pacer.run(|| -> Result<(), ()> { panic!("must not run") }).unwrap();
        assert_eq!(stats, PacerStats::default());
    }
}
