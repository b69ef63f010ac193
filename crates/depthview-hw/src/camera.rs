//! Camera interface and V4L2 capture via the `v4l` crate.

use crate::frame::RawFrame;
use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported: {0}")]
    StreamingNotSupported(String),
    #[error("no {0} frame has been captured yet")]
    NoFrame(Stream),
    #[error("timed out after {waited:?} waiting for a {stream} frame")]
    Timeout { stream: Stream, waited: Duration },
    #[error("camera error calling {function}({args}): {message}")]
    Call {
        function: &'static str,
        args: String,
        message: String,
    },
}

impl CameraError {
    fn call(function: &'static str, args: impl Into<String>, err: impl fmt::Display) -> Self {
        CameraError::Call {
            function,
            args: args.into(),
            message: err.to_string(),
        }
    }
}

/// The two streams a depth camera delivers per frame set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Color,
    Depth,
}

impl Stream {
    pub fn label(self) -> &'static str {
        match self {
            Stream::Color => "color",
            Stream::Depth => "depth",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Image geometry of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
}

impl Intrinsics {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Pixel layout of a raw camera buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 24-bit blue, green, red (3 bytes/pixel).
    Bgr8,
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 16-bit little-endian depth (2 bytes/pixel).
    Z16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgr8 => 3,
            PixelFormat::Yuyv | PixelFormat::Z16 => 2,
        }
    }

    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"BGR3" => Some(PixelFormat::Bgr8),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"Z16 " | b"Y16 " | b"Y16\0" => Some(PixelFormat::Z16),
            _ => None,
        }
    }
}

/// A source of synchronized color and depth frame sets.
///
/// Buffers returned by [`image_pixels`](Self::image_pixels) borrow the camera,
/// so they must be copied out before the next
/// [`wait_all_streams`](Self::wait_all_streams).
pub trait DepthCamera {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Current geometry of `stream`. Side-effect free.
    fn stream_intrinsics(&self, stream: Stream) -> Result<Intrinsics, CameraError>;

    /// Block until a new frame set is available for every enabled stream.
    fn wait_all_streams(&mut self) -> Result<(), CameraError>;

    /// Borrowed view of the latest buffer for `stream`.
    fn image_pixels(&self, stream: Stream) -> Result<RawFrame<'_>, CameraError>;

    /// Meters per depth unit.
    fn depth_scale(&self) -> f32;
}

impl<C: DepthCamera + ?Sized> DepthCamera for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn stream_intrinsics(&self, stream: Stream) -> Result<Intrinsics, CameraError> {
        (**self).stream_intrinsics(stream)
    }

    fn wait_all_streams(&mut self) -> Result<(), CameraError> {
        (**self).wait_all_streams()
    }

    fn image_pixels(&self, stream: Stream) -> Result<RawFrame<'_>, CameraError> {
        (**self).image_pixels(stream)
    }

    fn depth_scale(&self) -> f32 {
        (**self).depth_scale()
    }
}

/// Depth stream quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    BestQuality,
    LargestImage,
    HighestFramerate,
}

impl Preset {
    /// Depth (width, height, fps) requested for this preset.
    pub fn depth_mode(self) -> (u32, u32, u32) {
        match self {
            Preset::BestQuality => (480, 360, 60),
            Preset::LargestImage => (628, 468, 30),
            Preset::HighestFramerate => (320, 240, 90),
        }
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best" | "best-quality" => Ok(Preset::BestQuality),
            "largest" | "largest-image" => Ok(Preset::LargestImage),
            "fastest" | "highest-framerate" => Ok(Preset::HighestFramerate),
            other => Err(format!(
                "unknown depth preset '{other}' (expected best, largest or fastest)"
            )),
        }
    }
}

/// Stream setup applied when a camera is opened.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub color_width: u32,
    pub color_height: u32,
    pub color_fps: u32,
    pub depth_preset: Preset,
    /// Meters per depth unit reported by the camera.
    pub depth_scale: f32,
    /// Upper bound on a single `wait_all_streams()` call; `None` blocks forever.
    pub wait_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            color_width: 640,
            color_height: 480,
            color_fps: 60,
            depth_preset: Preset::BestQuality,
            depth_scale: 0.001,
            wait_timeout: Some(Duration::from_millis(1000)),
        }
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// List available V4L2 video capture devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for i in 0..16 {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            continue;
        }
        devices.push(DeviceInfo {
            path,
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
        });
    }

    devices
}

/// One V4L2 capture node plus the camera-owned slot its latest frame is copied into.
struct StreamSlot {
    stream_kind: Stream,
    device_path: String,
    _device: Device,
    stream: MmapStream<'static>,
    format: PixelFormat,
    intrinsics: Intrinsics,
    stride: usize,
    /// Overwritten on every wait.
    buffer: Vec<u8>,
    sequence: Option<u32>,
}

impl StreamSlot {
    fn dequeue(&mut self, timeout: Option<Duration>) -> Result<(), CameraError> {
        let (buf, meta) = self.stream.next().map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                CameraError::Timeout {
                    stream: self.stream_kind,
                    waited: timeout.unwrap_or_default(),
                }
            } else {
                CameraError::call("VIDIOC_DQBUF", self.device_path.as_str(), e)
            }
        })?;

        self.buffer.clear();
        self.buffer.extend_from_slice(buf);
        self.sequence = Some(meta.sequence);
        Ok(())
    }
}

/// Color + depth camera exposed as two V4L2 capture nodes.
pub struct V4l2Camera {
    name: String,
    color: StreamSlot,
    depth: StreamSlot,
    depth_scale: f32,
    wait_timeout: Option<Duration>,
}

impl V4l2Camera {
    /// Open the color and depth nodes (e.g., "/dev/video0", "/dev/video2") and start streaming.
    pub fn open(
        color_path: &str,
        depth_path: &str,
        config: &StreamConfig,
    ) -> Result<Self, CameraError> {
        let (color_device, _) = open_device(color_path)?;
        let (depth_device, name) = open_device(depth_path)?;

        let color = start_stream(
            Stream::Color,
            color_device,
            color_path,
            &[FourCC::new(b"BGR3"), FourCC::new(b"YUYV")],
            (config.color_width, config.color_height, config.color_fps),
            config.wait_timeout,
        )?;

        let depth = start_stream(
            Stream::Depth,
            depth_device,
            depth_path,
            &[FourCC::new(b"Z16 "), FourCC::new(b"Y16 ")],
            config.depth_preset.depth_mode(),
            config.wait_timeout,
        )?;

        Ok(Self {
            name,
            color,
            depth,
            depth_scale: config.depth_scale,
            wait_timeout: config.wait_timeout,
        })
    }

    fn slot(&self, stream: Stream) -> &StreamSlot {
        match stream {
            Stream::Color => &self.color,
            Stream::Depth => &self.depth,
        }
    }
}

impl DepthCamera for V4l2Camera {
    fn name(&self) -> &str {
        &self.name
    }

    fn stream_intrinsics(&self, stream: Stream) -> Result<Intrinsics, CameraError> {
        Ok(self.slot(stream).intrinsics)
    }

    fn wait_all_streams(&mut self) -> Result<(), CameraError> {
        self.color.dequeue(self.wait_timeout)?;
        self.depth.dequeue(self.wait_timeout)?;
        tracing::trace!(
            color_seq = ?self.color.sequence,
            depth_seq = ?self.depth.sequence,
            "frame set dequeued"
        );
        Ok(())
    }

    fn image_pixels(&self, stream: Stream) -> Result<RawFrame<'_>, CameraError> {
        let slot = self.slot(stream);
        if slot.sequence.is_none() {
            return Err(CameraError::NoFrame(stream));
        }
        Ok(RawFrame::new(&slot.buffer, slot.format, slot.stride))
    }

    fn depth_scale(&self) -> f32 {
        self.depth_scale
    }
}

/// Open a capture node, returning the device and its card name.
fn open_device(device_path: &str) -> Result<(Device, String), CameraError> {
    if !Path::new(device_path).exists() {
        return Err(CameraError::DeviceNotFound(device_path.to_string()));
    }

    let device = Device::with_path(device_path).map_err(|e| {
        if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
            CameraError::DeviceBusy(device_path.to_string())
        } else {
            CameraError::DeviceNotFound(format!("{device_path}: {e}"))
        }
    })?;

    let caps = device
        .query_caps()
        .map_err(|e| CameraError::call("VIDIOC_QUERYCAP", device_path, e))?;

    tracing::info!(
        device = device_path,
        driver = %caps.driver,
        card = %caps.card,
        "opened camera node"
    );

    if !caps
        .capabilities
        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
    {
        return Err(CameraError::StreamingNotSupported(device_path.to_string()));
    }

    Ok((device, caps.card))
}

/// Negotiate a format on `device` and start an mmap stream.
///
/// The first entry of `fourccs` is requested; the driver may answer with any
/// entry of the list.
fn start_stream(
    kind: Stream,
    device: Device,
    device_path: &str,
    fourccs: &[FourCC],
    (width, height, fps): (u32, u32, u32),
    timeout: Option<Duration>,
) -> Result<StreamSlot, CameraError> {
    let mut fmt = device.format().map_err(|e| {
        CameraError::FormatNegotiationFailed(format!("{device_path}: failed to get format: {e}"))
    })?;

    fmt.fourcc = fourccs[0];
    fmt.width = width;
    fmt.height = height;

    let negotiated = device.set_format(&fmt).map_err(|e| {
        CameraError::FormatNegotiationFailed(format!("{device_path}: failed to set format: {e}"))
    })?;

    let format = fourccs
        .iter()
        .find(|&&f| f == negotiated.fourcc)
        .and_then(|&f| PixelFormat::from_fourcc(f))
        .ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "{device_path}: unsupported {kind} pixel format {:?}",
                negotiated.fourcc
            ))
        })?;

    if let Err(e) = device.set_params(&Parameters::with_fps(fps)) {
        tracing::warn!(device = device_path, fps, error = %e, "could not set frame rate");
    }

    let intrinsics = Intrinsics {
        width: negotiated.width,
        height: negotiated.height,
    };
    let packed = intrinsics.width as usize * format.bytes_per_pixel();
    let stride = (negotiated.stride as usize).max(packed);

    tracing::info!(
        stream = %kind,
        width = negotiated.width,
        height = negotiated.height,
        stride,
        fourcc = ?negotiated.fourcc,
        "negotiated format"
    );

    let mut stream = MmapStream::with_buffers(&device, BufType::VideoCapture, 4)
        .map_err(|e| CameraError::call("VIDIOC_REQBUFS", device_path, e))?;
    if let Some(timeout) = timeout {
        stream.set_timeout(timeout);
    }

    Ok(StreamSlot {
        stream_kind: kind,
        device_path: device_path.to_string(),
        _device: device,
        stream,
        format,
        intrinsics,
        stride,
        buffer: Vec::new(),
        sequence: None,
    })
}
