use crate::engine::EngineHandle;
use std::path::PathBuf;
use zbus::interface;

pub const BUS_NAME: &str = "org.depthview.Viewer1";
pub const OBJECT_PATH: &str = "/org/depthview/Viewer1";

/// D-Bus interface for the depth viewer daemon.
///
/// Bus name: org.depthview.Viewer1 (session bus)
/// Object path: /org/depthview/Viewer1
pub struct ViewerService {
    engine: EngineHandle,
}

impl ViewerService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.depthview.Viewer1")]
impl ViewerService {
    /// Return engine status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.engine.status())
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Write the latest color and depth images as PNG into `dir`.
    ///
    /// Returns JSON with the frame sequence, capture time and written paths.
    async fn save_snapshot(&self, dir: &str) -> zbus::fdo::Result<String> {
        tracing::info!(dir, "save_snapshot requested");
        let Some(latest) = self.engine.latest() else {
            return Err(zbus::fdo::Error::Failed(
                "no frames captured yet".into(),
            ));
        };

        let sequence = latest.sequence;
        let captured_at_ms = latest.captured_at_ms;
        let dir = PathBuf::from(dir);
        let paths = tokio::task::spawn_blocking(move || {
            latest.frames.save_png(&dir, latest.sequence)
        })
        .await
        .map_err(|e| zbus::fdo::Error::Failed(format!("snapshot task failed: {e}")))?
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        Ok(serde_json::json!({
            "sequence": sequence,
            "captured_at_ms": captured_at_ms,
            "paths": paths,
        })
        .to_string())
    }
}
