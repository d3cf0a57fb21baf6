use anyhow::Result;
use std::collections::HashMap;

/// Bounding box in pixel space, `[x1, y1, x2, y2]`.
pub type BBox = [f32; 4];

/// Per-identity confidence scores for one face crop. Scores need not sum
/// to one and the map may be empty when nothing in the gallery matched.
pub type VoteMap = HashMap<String, f32>;

/// A single detection result: one face in one frame.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BBox,
    pub votes: VoteMap,
    /// Encoded face-crop bytes, passed through to the export payload.
    pub face: Vec<u8>,
}

impl Detection {
    pub fn new(bbox: BBox, votes: VoteMap, face: Vec<u8>) -> Self {
        Self { bbox, votes, face }
    }

    /// Box centroid.
    pub fn center(&self) -> (f32, f32) {
        (
            (self.bbox[0] + self.bbox[2]) / 2.0,
            (self.bbox[1] + self.bbox[3]) / 2.0,
        )
    }

    /// Scalar size measure (box width).
    pub fn size(&self) -> f32 {
        self.bbox[2] - self.bbox[0]
    }
}

/// Source of frames, until the stream ends.
pub trait FrameSource {
    type Frame;

    /// Next frame, or `None` once the stream is exhausted. Exhaustion is
    /// the pipeline's single terminal condition.
    fn next_frame(&mut self) -> Result<Option<Self::Frame>>;
}

/// Face detector collaborator. Returns boxes and encoded face crops,
/// positionally aligned.
pub trait Detector<F> {
    fn detect(&mut self, frame: &F) -> Result<(Vec<BBox>, Vec<Vec<u8>>)>;
}

/// Identity classifier collaborator. Returns one vote map per input
/// crop, positionally aligned.
pub trait Recognizer {
    fn recognize(&mut self, faces: &[Vec<u8>]) -> Result<Vec<VoteMap>>;
}
