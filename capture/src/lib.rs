//! Camera capture: turns an MJPEG HTTP stream into a "latest frame" feed.

pub mod mjpeg;

pub use mjpeg::{CameraFeed, MjpegCamera, MjpegParser};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to create HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("camera unreachable: {0}")]
    Unreachable(reqwest::Error),
    #[error("camera refused access (HTTP {0})")]
    PermissionDenied(u16),
    #[error("camera answered HTTP {0}")]
    HttpStatus(u16),
    #[error("camera stream error: {0}")]
    Stream(reqwest::Error),
    #[error("camera feed closed before delivering a frame")]
    FeedClosed,
}
