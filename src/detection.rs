//! Per-frame detection record and the external collaborator contracts
//! (`spec.md` §6). The detector, tracker, embedder and staff classifier are
//! out of scope; this module defines only the trait boundary a real binding
//! would implement, mirroring how the teacher's [`crate::track::Metric`] and
//! [`crate::track::AttributeUpdate`] traits describe a collaborator's shape
//! without providing a production implementation in the library itself.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonType {
    Staff,
    Customer,
}

/// COCO class id for `person`, the only class the detector contract
/// forwards (`spec.md` §6: "filters `class_id == person`").
pub const PERSON_CLASS_ID: u32 = 0;

/// Default confidence floor applied to raw detections before they ever
/// reach the tracker (`spec.md` §6).
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.5;

/// One detection for one track in one frame, already filtered to
/// `class_id == person` and above the confidence floor by the caller
/// (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct Detection {
    pub track_id: u64,
    pub channel_id: u32,
    pub bbox: (f32, f32, f32, f32),
    pub confidence: f32,
    pub embedding: Option<Vec<f32>>,
    pub person_type: Option<PersonType>,
    pub is_staff: Option<bool>,
    pub person_id: Option<String>,
}

impl Detection {
    pub fn centroid(&self) -> (f32, f32) {
        crate::geometry::midpoint(self.bbox)
    }

    /// I4: a detection is excluded from counting when it is known staff,
    /// by either of the two equivalent fields the upstream classifier may
    /// have populated.
    pub fn is_marked_staff(&self) -> bool {
        self.is_staff == Some(true) || self.person_type == Some(PersonType::Staff)
    }
}

/// `detect(frame) -> [{bbox, confidence, class_id}]`, filtered by the
/// pipeline to `class_id == person` above a confidence floor before
/// forwarding (`spec.md` §6). Implemented by a real YOLO-family binding;
/// out of this crate's scope beyond this contract.
pub trait Detector {
    type Frame;
    fn detect(&mut self, frame: &Self::Frame) -> Vec<RawDetection>;
}

#[derive(Debug, Clone, Copy)]
pub struct RawDetection {
    pub bbox: (f32, f32, f32, f32),
    pub confidence: f32,
    pub class_id: u32,
}

/// `update(detections, frame, session_id) -> [Detection with track_id]`.
/// Track IDs are stable positive integers; a track may vanish and never
/// return. `session_id` scopes the tracker's own internal state and is
/// opaque to it.
pub trait Tracker {
    type Frame;
    fn update(&mut self, detections: &[RawDetection], frame: &Self::Frame, session_id: u64) -> Vec<Detection>;
}

/// `embed(crop) -> 128-dim L2-normalized vector`; empty input yields empty
/// output.
pub trait Embedder {
    type Crop;
    fn embed(&mut self, crop: &Self::Crop) -> Vec<f32>;
}

/// `classify(crop) -> (label, confidence)`.
pub trait StaffClassifier {
    type Crop;
    fn classify(&mut self, crop: &Self::Crop) -> (PersonType, f32);
}
