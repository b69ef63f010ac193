//! depthview-hw: Camera access and frame buffers for the depth viewer.
//!
//! Defines the `DepthCamera` interface with V4L2 and synthetic backends,
//! and the buffer types that move pixels out of camera-owned memory.

pub mod camera;
pub mod frame;
pub mod synthetic;

pub use camera::{
    list_devices, CameraError, DepthCamera, DeviceInfo, Intrinsics, PixelFormat, Preset, Stream,
    StreamConfig, V4l2Camera,
};
pub use frame::{DepthFrame, DisplayImage, FrameError, RawFrame};
pub use synthetic::SyntheticCamera;
