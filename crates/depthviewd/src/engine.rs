use crate::config::{Config, Source};
use depthview_core::{run_cycle, CycleError, FramePacer, FramePair, PacerHandle, PacerStats};
use depthview_hw::{CameraError, DepthCamera, SyntheticCamera, V4l2Camera};
use serde::Serialize;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("{count} consecutive cycles failed; last error: {last}")]
    TooManyFailures { count: u32, last: CycleError },
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ThreadExited,
}

/// A completed cycle as seen by the presentation side.
#[derive(Debug)]
pub struct PublishedFrames {
    pub sequence: u64,
    /// Milliseconds since the Unix epoch.
    pub captured_at_ms: u64,
    pub frames: FramePair,
}

/// Snapshot of engine health, serialized for `Status()`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub version: String,
    pub camera: String,
    pub active: bool,
    pub cycles: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub color_size: Option<(u32, u32)>,
    pub depth_size: Option<(u32, u32)>,
    pub depth_valid: Option<usize>,
    /// Nearest and farthest valid depth of the last frame, in meters.
    pub depth_range_m: Option<(f32, f32)>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    frames: watch::Receiver<Option<Arc<PublishedFrames>>>,
    status: Arc<Mutex<EngineStatus>>,
    pacer: PacerHandle,
}

impl EngineHandle {
    /// Latest published frame pair, if any cycle has completed.
    pub fn latest(&self) -> Option<Arc<PublishedFrames>> {
        self.frames.borrow().clone()
    }

    pub fn status(&self) -> EngineStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Ask the pacer to stop after the in-flight cycle.
    pub fn stop(&self) {
        self.pacer.stop();
    }

    /// Resolves once the engine thread has exited.
    pub async fn closed(&self) {
        let mut rx = self.frames.clone();
        while rx.changed().await.is_ok() {}
    }
}

/// Owner of the engine thread.
pub struct Engine {
    handle: EngineHandle,
    thread: JoinHandle<Result<PacerStats, EngineError>>,
}

impl Engine {
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop the pacer and wait for the engine thread.
    ///
    /// Returns the fault that stopped the engine, if it stopped on its own.
    pub fn shutdown(self) -> Result<PacerStats, EngineError> {
        self.handle.stop();
        self.thread.join().map_err(|_| EngineError::ThreadExited)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The camera is opened on that thread; this call blocks until it is open
/// and fails fast if it cannot be.
pub fn spawn_engine(config: &Config) -> Result<Engine, EngineError> {
    let pacer = FramePacer::new(config.interval);
    let (frames_tx, frames_rx) = watch::channel(None);
    let status = Arc::new(Mutex::new(EngineStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..EngineStatus::default()
    }));
    let handle = EngineHandle {
        frames: frames_rx,
        status: Arc::clone(&status),
        pacer: pacer.handle(),
    };

    let (startup_tx, startup_rx) = mpsc::sync_channel::<Result<String, CameraError>>(1);
    let config = config.clone();

    let thread = std::thread::Builder::new()
        .name("depthview-engine".into())
        .spawn(move || {
            let mut camera = match open_camera(&config) {
                Ok(camera) => camera,
                Err(e) => {
                    let _ = startup_tx.send(Err(e));
                    return Ok(PacerStats::default());
                }
            };
            let _ = startup_tx.send(Ok(camera.name().to_string()));

            tracing::info!("engine thread started");
            let result = run_engine(
                camera.as_mut(),
                &pacer,
                &frames_tx,
                &status,
                config.max_consecutive_failures,
            );
            tracing::info!("engine thread exiting");
            result
        })
        .map_err(EngineError::Spawn)?;

    match startup_rx.recv() {
        Ok(Ok(name)) => {
            tracing::info!(camera = %name, "camera opened");
            if let Ok(mut s) = handle.status.lock() {
                s.camera = name;
            }
            Ok(Engine { handle, thread })
        }
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(EngineError::Camera(e))
        }
        Err(_) => Err(EngineError::ThreadExited),
    }
}

fn open_camera(config: &Config) -> Result<Box<dyn DepthCamera>, CameraError> {
    match config.source {
        Source::V4l2 => Ok(Box::new(V4l2Camera::open(
            &config.color_device,
            &config.depth_device,
            &config.stream,
        )?)),
        Source::Synthetic => {
            tracing::info!("using synthetic camera");
            Ok(Box::new(SyntheticCamera::from_config(&config.stream)))
        }
    }
}

/// Drive cycles until stopped or until `max_failures` consecutive cycles fail.
fn run_engine(
    camera: &mut dyn DepthCamera,
    pacer: &FramePacer,
    frames: &watch::Sender<Option<Arc<PublishedFrames>>>,
    status: &Mutex<EngineStatus>,
    max_failures: u32,
) -> Result<PacerStats, EngineError> {
    let depth_scale = camera.depth_scale();
    let mut sequence = 0u64;
    let mut consecutive = 0u32;

    if let Ok(mut s) = status.lock() {
        s.active = true;
    }

    let result = pacer.run(|| match run_cycle(&mut *camera) {
        Ok(pair) => {
            consecutive = 0;
            sequence += 1;
            record_success(status, &pair, depth_scale);
            frames.send_replace(Some(Arc::new(PublishedFrames {
                sequence,
                captured_at_ms: now_ms(),
                frames: pair,
            })));
            Ok(())
        }
        Err(e) => {
            consecutive += 1;
            tracing::warn!(error = %e, consecutive, "cycle failed");
            if let Ok(mut s) = status.lock() {
                s.failures += 1;
                s.consecutive_failures = consecutive;
                s.last_error = Some(e.to_string());
            }
            if max_failures != 0 && consecutive >= max_failures {
                Err(EngineError::TooManyFailures {
                    count: consecutive,
                    last: e,
                })
            } else {
                Ok(())
            }
        }
    });

    if let Ok(mut s) = status.lock() {
        s.active = false;
    }
    match &result {
        Ok(stats) => tracing::info!(cycles = stats.cycles, "engine stopped"),
        Err(e) => tracing::error!(error = %e, "engine stopped on fault"),
    }
    result
}

fn record_success(status: &Mutex<EngineStatus>, pair: &FramePair, depth_scale: f32) {
    let summary = &pair.summary;
    if let Ok(mut s) = status.lock() {
        s.cycles += 1;
        s.consecutive_failures = 0;
        s.color_size = Some((pair.color.width(), pair.color.height()));
        s.depth_size = Some((pair.depth.width(), pair.depth.height()));
        s.depth_valid = Some(summary.valid);
        s.depth_range_m = summary.range_meters(depth_scale);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
