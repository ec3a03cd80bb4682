//! faceid-hw: hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access and the BGR [`Frame`] type the
//! verification pipeline consumes.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CaptureError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError, Roi};
