use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};

/// Closed set of classes the core reasons about. Anything the classifier
/// reports outside of fire and smoke collapses into `Other`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Fire,
    Smoke,
    Other,
}

impl Label {
    /// Maps a raw classifier class name, case-insensitively.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "fire" => Label::Fire,
            "smoke" => Label::Smoke,
            _ => Label::Other,
        }
    }

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Fire => "fire",
            Label::Smoke => "smoke",
            Label::Other => "other",
        }
    }

    #[inline]
    pub fn is_trigger(&self) -> bool {
        matches!(self, Label::Fire | Label::Smoke)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub label: Label,
    #[serde(rename = "p")]
    pub confidence: f32,
    pub bbox: BBox<Ltrb>,
}

impl Detection {
    pub fn new(label: Label, confidence: f32, bbox: BBox<Ltrb>) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }

    #[inline]
    pub fn is_confident(&self, threshold: f32) -> bool {
        self.confidence > threshold
    }
}

/// Detections reported for a single frame.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct DetectionSet {
    pub detections: Vec<Detection>,
}

impl DetectionSet {
    #[inline]
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    /// Detections worth drawing: any label above the threshold.
    pub fn confident(&self, threshold: f32) -> impl Iterator<Item = &Detection> {
        self.detections
            .iter()
            .filter(move |d| d.is_confident(threshold))
    }

    /// True when any fire or smoke detection is strictly above `threshold`.
    pub fn triggered(&self, threshold: f32) -> bool {
        self.detections
            .iter()
            .any(|d| d.label.is_trigger() && d.is_confident(threshold))
    }
}

impl From<Vec<Detection>> for DetectionSet {
    fn from(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}
