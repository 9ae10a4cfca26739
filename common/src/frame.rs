use bytes::Bytes;

/// A camera frame with timestamp metadata.
///
/// The payload is the JPEG image exactly as the camera delivered it; it is
/// reference counted so handing the latest frame to the detector and to
/// viewers does not copy the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub jpeg: Bytes,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(jpeg: impl Into<Bytes>, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            jpeg: jpeg.into(),
            captured_at_ms,
            seq,
        }
    }

    /// Returns the size of the JPEG payload in bytes.
    pub fn payload_size(&self) -> usize {
        self.jpeg.len()
    }

    /// Returns true if the payload starts with the JPEG SOI marker.
    pub fn looks_like_jpeg(&self) -> bool {
        self.jpeg.starts_with(&[0xFF, 0xD8])
    }
}
