use std::future::Future;

use live_overlay_capture::CameraFeed;
use live_overlay_common::frame::Frame;

use crate::error::FrameLoopError;

/// Supplies the frame the loop should classify next.
pub trait FrameSource {
    /// Resolves once the source has delivered its first frame.
    fn ready(&mut self) -> impl Future<Output = Result<(), FrameLoopError>> + Send;

    /// The newest frame, if one has arrived.
    fn current_frame(&self) -> Option<Frame>;
}

impl FrameSource for CameraFeed {
    async fn ready(&mut self) -> Result<(), FrameLoopError> {
        self.first_frame()
            .await
            .map(|_| ())
            .map_err(|_| FrameLoopError::SourceClosed)
    }

    fn current_frame(&self) -> Option<Frame> {
        self.latest()
    }
}
