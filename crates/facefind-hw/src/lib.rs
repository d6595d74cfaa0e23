//! facefind-hw — Camera capture for reference photos.
//!
//! Provides V4L2-based still capture with conversion of the negotiated
//! pixel format to RGB.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
