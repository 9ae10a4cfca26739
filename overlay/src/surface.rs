use std::collections::BTreeMap;

use live_overlay_common::annotation::{AnnotationDescriptor, OverlaySnapshot};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Opaque reference to an element attached to a display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(u64);

impl ElementHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Identifies the cycle whose elements are being presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Commit {
    pub cycle: u64,
    pub frame_seq: Option<u64>,
    pub captured_at_ms: Option<i64>,
}

/// Where annotations are drawn.
///
/// The frame loop only manages element lifecycles through this interface;
/// it never looks at what ends up rendered.
pub trait DisplaySurface {
    fn attach(&mut self, descriptor: &AnnotationDescriptor) -> ElementHandle;

    fn detach(&mut self, handle: ElementHandle);

    /// Called once after all detaches and attaches of a cycle are applied.
    fn present(&mut self, _commit: &Commit) {}
}

/// Surface that keeps attached elements in memory and publishes a complete
/// [`OverlaySnapshot`] to viewers on every `present`.
///
/// Viewers never observe a half-applied cycle: attach/detach only touch the
/// private element map, and the snapshot is replaced in one step.
pub struct PublishedSurface {
    elements: BTreeMap<u64, AnnotationDescriptor>,
    next_id: u64,
    tx: watch::Sender<OverlaySnapshot>,
}

impl Default for PublishedSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishedSurface {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(OverlaySnapshot::default());
        Self {
            elements: BTreeMap::new(),
            next_id: 0,
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<OverlaySnapshot> {
        self.tx.subscribe()
    }

    /// Number of elements currently attached.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl DisplaySurface for PublishedSurface {
    fn attach(&mut self, descriptor: &AnnotationDescriptor) -> ElementHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.elements.insert(id, descriptor.clone());
        ElementHandle::new(id)
    }

    fn detach(&mut self, handle: ElementHandle) {
        if self.elements.remove(&handle.id()).is_none() {
            warn!(handle = handle.id(), "detach of unknown element");
        }
    }

    fn present(&mut self, commit: &Commit) {
        let snapshot = OverlaySnapshot {
            cycle: commit.cycle,
            frame_seq: commit.frame_seq,
            captured_at_ms: commit.captured_at_ms,
            annotations: self.elements.values().cloned().collect(),
        };
        debug!(
            cycle = commit.cycle,
            elements = snapshot.annotations.len(),
            "overlay presented"
        );
        self.tx.send_replace(snapshot);
    }
}
