//! Real-time detection overlay: detect, reconcile, commit, repeat.

pub mod controller;
pub mod detector;
pub mod error;
pub mod readiness;
pub mod reconciler;
pub mod source;
pub mod stop;
pub mod surface;

pub use controller::{FrameLoopController, LoopState, LoopSummary, RunOutcome};
pub use detector::{Detector, HttpDetector};
pub use error::{DetectionError, FrameLoopError, SetupError};
pub use readiness::{model_readiness, ModelReadiness, ReadySignal};
pub use reconciler::{OverlayPlan, OverlayReconciler};
pub use source::FrameSource;
pub use stop::{stop_channel, StopHandle, StopToken};
pub use surface::{Commit, DisplaySurface, ElementHandle, PublishedSurface};
