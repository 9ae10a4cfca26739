use live_overlay_capture::CaptureError;

/// Problems that keep the loop from ever starting.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("frame loop failed: {0}")]
    Loop(#[from] FrameLoopError),
}

impl From<CaptureError> for SetupError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::PermissionDenied(_) => SetupError::PermissionDenied(e.to_string()),
            other => SetupError::CapabilityUnavailable(other.to_string()),
        }
    }
}

/// A single detection call failed. Contained within one cycle.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("detector request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("detector answered HTTP {0}")]
    HttpStatus(u16),
    #[error("malformed detector response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("detector failed: {0}")]
    Other(String),
}

/// Errors that end a running frame loop.
#[derive(Debug, thiserror::Error)]
pub enum FrameLoopError {
    #[error("frame source closed before delivering a frame")]
    SourceClosed,
}
