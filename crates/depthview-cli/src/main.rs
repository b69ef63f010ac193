use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depthview_core::{run_cycle, FramePacer};
use depthview_hw::{DepthCamera, Preset, StreamConfig, SyntheticCamera, V4l2Camera};
use std::path::PathBuf;
use std::time::Duration;

const BUS_NAME: &str = "org.depthview.Viewer1";
const OBJECT_PATH: &str = "/org/depthview/Viewer1";
const INTERFACE: &str = "org.depthview.Viewer1";

#[derive(Parser)]
#[command(name = "depthview", about = "Depthview depth camera viewer CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Capture frame sets and write color and equalized depth PNGs
    Capture {
        /// Color capture node
        #[arg(long, default_value = "/dev/video0")]
        color_device: String,
        /// Depth capture node
        #[arg(long, default_value = "/dev/video2")]
        depth_device: String,
        /// Use the generated test scene instead of a camera
        #[arg(long)]
        synthetic: bool,
        /// Depth preset: best, largest or fastest
        #[arg(long, default_value = "best")]
        preset: Preset,
        /// Number of frame sets to capture
        #[arg(short = 'n', long, default_value_t = 1)]
        frames: u64,
        /// Pacer interval in milliseconds
        #[arg(long, default_value_t = 16)]
        interval_ms: u64,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Show daemon status
    Status,
    /// Ask the daemon to write its latest frames as PNG
    Snapshot {
        /// Directory the daemon writes into
        #[arg(short, long)]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => {
            let devices = depthview_hw::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Capture {
            color_device,
            depth_device,
            synthetic,
            preset,
            frames,
            interval_ms,
            out,
        } => {
            let config = StreamConfig {
                depth_preset: preset,
                ..StreamConfig::default()
            };
            tokio::task::spawn_blocking(move || {
                let camera: Box<dyn DepthCamera> = if synthetic {
                    Box::new(SyntheticCamera::from_config(&config))
                } else {
                    Box::new(V4l2Camera::open(&color_device, &depth_device, &config)?)
                };
                capture(camera, frames, Duration::from_millis(interval_ms), &out)
            })
            .await??;
        }
        Commands::Status => {
            let reply = call_daemon("Status", &()).await?;
            let status: serde_json::Value = serde_json::from_str(&reply)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Snapshot { dir } => {
            let dir = std::fs::canonicalize(&dir)
                .with_context(|| format!("snapshot directory {}", dir.display()))?;
            let dir = dir.to_string_lossy().into_owned();
            let reply = call_daemon("SaveSnapshot", &dir).await?;
            let written: serde_json::Value = serde_json::from_str(&reply)?;
            for path in written["paths"].as_array().into_iter().flatten() {
                println!("{}", path.as_str().unwrap_or_default());
            }
        }
    }

    Ok(())
}

/// Run `count` paced cycles, writing each frame pair into `out`.
fn capture(
    mut camera: Box<dyn DepthCamera>,
    count: u64,
    interval: Duration,
    out: &std::path::Path,
) -> Result<()> {
    if count == 0 {
        return Ok(());
    }
    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    println!("Capturing {count} frame set(s) from {}", camera.name());

    let depth_scale = camera.depth_scale();
    let pacer = FramePacer::new(interval);
    let handle = pacer.handle();
    let mut sequence = 0u64;

    pacer.run(|| -> Result<()> {
        let pair = run_cycle(camera.as_mut())?;
        sequence += 1;
        let [color, depth] = pair.save_png(out, sequence)?;
        tracing::debug!(sequence, "frame set written");

        let valid_pct = 100.0 * pair.summary.valid as f64 / pair.summary.pixels.max(1) as f64;
        match pair.summary.range_meters(depth_scale) {
            Some((near, far)) => println!(
                "{}  {}  valid {valid_pct:.1}%  range {near:.3}-{far:.3} m",
                color.display(),
                depth.display()
            ),
            None => println!(
                "{}  {}  no valid depth",
                color.display(),
                depth.display()
            ),
        }

        if sequence >= count {
            handle.stop();
        }
        Ok(())
    })?;

    Ok(())
}

async fn call_daemon<B>(method: &str, body: &B) -> Result<String>
where
    B: serde::Serialize + zbus::zvariant::DynamicType,
{
    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let reply = conn
        .call_method(Some(BUS_NAME), OBJECT_PATH, Some(INTERFACE), method, body)
        .await
        .with_context(|| format!("calling {method} on {BUS_NAME}; is depthviewd running?"))?;
    Ok(reply.body().deserialize::<String>()?)
}
