use std::sync::Arc;

use tokio::sync::watch;

use crate::error::SetupError;

enum LoadState<D> {
    Loading,
    Ready(Arc<D>),
    Failed(String),
}

/// Create the one-shot readiness pair for a detector that loads in the
/// background.
pub fn model_readiness<D>() -> (ReadySignal<D>, ModelReadiness<D>) {
    let (tx, rx) = watch::channel(LoadState::Loading);
    (ReadySignal { tx }, ModelReadiness { rx })
}

/// Held by the loader; consumed when loading finishes either way.
pub struct ReadySignal<D> {
    tx: watch::Sender<LoadState<D>>,
}

impl<D> ReadySignal<D> {
    pub fn ready(self, detector: D) {
        self.tx.send_replace(LoadState::Ready(Arc::new(detector)));
    }

    pub fn failed(self, reason: impl Into<String>) {
        self.tx.send_replace(LoadState::Failed(reason.into()));
    }
}

/// Observer side: lets the frame loop check readiness without blocking,
/// or wait for it.
pub struct ModelReadiness<D> {
    rx: watch::Receiver<LoadState<D>>,
}

impl<D> Clone for ModelReadiness<D> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<D> ModelReadiness<D> {
    /// The loaded detector, or `None` while loading or after a failure.
    pub fn try_get(&self) -> Option<Arc<D>> {
        match &*self.rx.borrow() {
            LoadState::Ready(detector) => Some(Arc::clone(detector)),
            _ => None,
        }
    }

    /// Wait until loading has finished.
    pub async fn wait(&mut self) -> Result<Arc<D>, SetupError> {
        let state = self
            .rx
            .wait_for(|s| !matches!(s, LoadState::Loading))
            .await
            .map_err(|_| {
                SetupError::CapabilityUnavailable("detector loader exited without reporting".into())
            })?;
        match &*state {
            LoadState::Ready(detector) => Ok(Arc::clone(detector)),
            LoadState::Failed(reason) => Err(SetupError::CapabilityUnavailable(reason.clone())),
            LoadState::Loading => Err(SetupError::CapabilityUnavailable(
                "detector still loading".into(),
            )),
        }
    }
}
