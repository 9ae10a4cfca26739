use live_overlay_common::annotation::{AnnotationDescriptor, Geometry};
use live_overlay_common::config::OverlayConfig;
use live_overlay_common::detection::{BoundingBox, Detection};

use crate::surface::ElementHandle;

/// Turns one frame's raw detections into the annotations to draw.
///
/// Stateless: the output depends only on the detection list passed in,
/// never on what is currently on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayReconciler {
    min_confidence: f64,
    caption_offset: f64,
}

impl Default for OverlayReconciler {
    fn default() -> Self {
        Self::from_config(&OverlayConfig::default())
    }
}

impl OverlayReconciler {
    pub fn new(min_confidence: f64, caption_offset: f64) -> Self {
        Self {
            min_confidence,
            caption_offset,
        }
    }

    pub fn from_config(config: &OverlayConfig) -> Self {
        Self::new(config.min_confidence, config.caption_offset)
    }

    /// Strictly above the threshold; NaN scores never pass.
    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.confidence > self.min_confidence
    }

    /// A highlight followed by its caption for every accepted detection,
    /// in input order.
    pub fn reconcile(&self, detections: &[Detection]) -> Vec<AnnotationDescriptor> {
        detections
            .iter()
            .filter(|d| self.accepts(d))
            .flat_map(|d| {
                [
                    AnnotationDescriptor::highlight(highlight_geometry(&d.bounding_box)),
                    AnnotationDescriptor::caption(
                        caption_geometry(&d.bounding_box, self.caption_offset),
                        caption_text(d),
                    ),
                ]
            })
            .collect()
    }

    /// Full replacement of the on-screen set: everything currently attached
    /// goes, this frame's annotations come in.
    pub fn plan(&self, current: Vec<ElementHandle>, detections: &[Detection]) -> OverlayPlan {
        OverlayPlan {
            detach: current,
            attach: self.reconcile(detections),
        }
    }
}

/// Remove/add commands for one cycle. Detaches are applied before attaches.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayPlan {
    pub detach: Vec<ElementHandle>,
    pub attach: Vec<AnnotationDescriptor>,
}

pub fn highlight_geometry(bbox: &BoundingBox) -> Geometry {
    Geometry {
        left: bbox.x,
        top: bbox.y,
        width: bbox.width,
        height: Some(bbox.height),
    }
}

pub fn caption_geometry(bbox: &BoundingBox, offset: f64) -> Geometry {
    Geometry {
        left: bbox.x,
        top: bbox.y - offset,
        width: bbox.width - offset,
        height: None,
    }
}

pub fn caption_text(detection: &Detection) -> String {
    format!(
        "{} - with {}% confidence",
        detection.label,
        detection.confidence_percent()
    )
}
