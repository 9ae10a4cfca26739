use serde::Serialize;

/// What an annotation element draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    /// Outline over the detected object's bounding box.
    Highlight,
    /// Text label placed just above the highlight.
    Caption,
}

/// Position and size of an element in frame pixel space.
///
/// Captions carry no height; the page sizes them to their text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Geometry {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// A single element of the overlay, derived from one detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationDescriptor {
    pub kind: AnnotationKind,
    pub geometry: Geometry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl AnnotationDescriptor {
    pub fn highlight(geometry: Geometry) -> Self {
        Self {
            kind: AnnotationKind::Highlight,
            geometry,
            text: None,
        }
    }

    pub fn caption(geometry: Geometry, text: String) -> Self {
        Self {
            kind: AnnotationKind::Caption,
            geometry,
            text: Some(text),
        }
    }

    /// Inline CSS that places this element over the video.
    ///
    /// Captions are positioned through their margins and pinned to
    /// `top: 0; left: 0` of their own box.
    pub fn style(&self) -> String {
        let g = &self.geometry;
        match self.kind {
            AnnotationKind::Highlight => format!(
                "left: {}px; top: {}px; width: {}px; height: {}px;",
                g.left,
                g.top,
                g.width,
                g.height.unwrap_or_default()
            ),
            AnnotationKind::Caption => format!(
                "margin-left: {}px; margin-top: {}px; width: {}px; top: 0; left: 0;",
                g.left, g.top, g.width
            ),
        }
    }
}

/// What viewers receive after every committed cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverlaySnapshot {
    pub cycle: u64,
    pub frame_seq: Option<u64>,
    pub captured_at_ms: Option<i64>,
    pub annotations: Vec<AnnotationDescriptor>,
}
