use depthview_hw::{Preset, StreamConfig};
use std::time::Duration;

/// Where frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    V4l2,
    Synthetic,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Frame source (default: v4l2).
    pub source: Source,
    /// V4L2 color node (default: /dev/video0).
    pub color_device: String,
    /// V4L2 depth node (default: /dev/video2).
    pub depth_device: String,
    /// Stream geometry, depth preset and wait timeout.
    pub stream: StreamConfig,
    /// Pacer tick interval.
    pub interval: Duration,
    /// Consecutive failed cycles tolerated before the engine stops (0 = never stop).
    pub max_consecutive_failures: u32,
    /// Whether to serve the D-Bus interface.
    pub dbus_enabled: bool,
}

impl Config {
    /// Load configuration from `DEPTHVIEW_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = StreamConfig::default();

        let source = match lookup("DEPTHVIEW_SOURCE").as_deref() {
            Some("synthetic") => Source::Synthetic,
            Some("v4l2") | None => Source::V4l2,
            Some(other) => {
                tracing::warn!(source = other, "unknown DEPTHVIEW_SOURCE; using v4l2");
                Source::V4l2
            }
        };

        let depth_preset = match lookup("DEPTHVIEW_DEPTH_PRESET") {
            Some(v) => v.parse::<Preset>().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "invalid DEPTHVIEW_DEPTH_PRESET; using best");
                Preset::BestQuality
            }),
            None => defaults.depth_preset,
        };

        let wait_timeout_ms = parsed(&lookup, "DEPTHVIEW_WAIT_TIMEOUT_MS", 1000u64);

        Self {
            source,
            color_device: lookup("DEPTHVIEW_COLOR_DEVICE")
                .unwrap_or_else(|| "/dev/video0".to_string()),
            depth_device: lookup("DEPTHVIEW_DEPTH_DEVICE")
                .unwrap_or_else(|| "/dev/video2".to_string()),
            stream: StreamConfig {
                color_width: parsed(&lookup, "DEPTHVIEW_COLOR_WIDTH", defaults.color_width),
                color_height: parsed(&lookup, "DEPTHVIEW_COLOR_HEIGHT", defaults.color_height),
                color_fps: parsed(&lookup, "DEPTHVIEW_COLOR_FPS", defaults.color_fps),
                depth_preset,
                depth_scale: parsed(&lookup, "DEPTHVIEW_DEPTH_SCALE", defaults.depth_scale),
                wait_timeout: (wait_timeout_ms > 0).then(|| Duration::from_millis(wait_timeout_ms)),
            },
            interval: Duration::from_millis(parsed(&lookup, "DEPTHVIEW_INTERVAL_MS", 16u64)),
            max_consecutive_failures: parsed(&lookup, "DEPTHVIEW_MAX_CONSECUTIVE_FAILURES", 30u32),
            dbus_enabled: lookup("DEPTHVIEW_DBUS_ENABLED")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.source, Source::V4l2);
        assert_eq!(cfg.color_device, "/dev/video0");
        assert_eq!(cfg.depth_device, "/dev/video2");
        assert_eq!(cfg.interval, Duration::from_millis(16));
        assert_eq!(cfg.stream.color_width, 640);
        assert_eq!(cfg.stream.color_fps, 60);
        assert_eq!(cfg.stream.depth_preset, Preset::BestQuality);
        assert_eq!(cfg.stream.wait_timeout, Some(Duration::from_millis(1000)));
        assert_eq!(cfg.max_consecutive_failures, 30);
        assert!(cfg.dbus_enabled);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("DEPTHVIEW_SOURCE", "synthetic"),
            ("DEPTHVIEW_DEPTH_PRESET", "fastest"),
            ("DEPTHVIEW_INTERVAL_MS", "33"),
            ("DEPTHVIEW_COLOR_WIDTH", "1280"),
            ("DEPTHVIEW_DBUS_ENABLED", "0"),
        ]);
        assert_eq!(cfg.source, Source::Synthetic);
        assert_eq!(cfg.stream.depth_preset, Preset::HighestFramerate);
        assert_eq!(cfg.interval, Duration::from_millis(33));
        assert_eq!(cfg.stream.color_width, 1280);
        assert!(!cfg.dbus_enabled);
    }

    #[test]
    fn test_zero_timeout_blocks_forever() {
        let cfg = config(&[("DEPTHVIEW_WAIT_TIMEOUT_MS", "0")]);
        assert_eq!(cfg.stream.wait_timeout, None);
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let cfg = config(&[
            ("DEPTHVIEW_INTERVAL_MS", "fast"),
            ("DEPTHVIEW_SOURCE", "kinect"),
            ("DEPTHVIEW_DEPTH_PRESET", "ultra"),
        ]);
        assert_eq!(cfg.interval, Duration::from_millis(16));
        assert_eq!(cfg.source, Source::V4l2);
        assert_eq!(cfg.stream.depth_preset, Preset::BestQuality);
    }
}
