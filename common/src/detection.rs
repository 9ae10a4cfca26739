use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel space, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One classified object in a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// Model score in [0, 1].
    pub confidence: f64,
    pub bounding_box: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f64, bounding_box: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bounding_box,
        }
    }

    /// Confidence as a whole percentage, rounding half away from zero.
    pub fn confidence_percent(&self) -> i64 {
        (self.confidence * 100.0).round() as i64
    }
}

/// A prediction as returned by a COCO-SSD style detection service:
/// `{ "class": "cat", "score": 0.91, "bbox": [x, y, w, h] }`.
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub class: String,
    pub score: f64,
    pub bbox: [f64; 4],
}

impl From<Prediction> for Detection {
    fn from(p: Prediction) -> Self {
        let [x, y, width, height] = p.bbox;
        Detection::new(p.class, p.score, BoundingBox::new(x, y, width, height))
    }
}
