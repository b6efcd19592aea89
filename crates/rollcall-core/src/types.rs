use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Face location in image pixel space.
///
/// Serialized as `[top, right, bottom, left]`, the order detectors report it in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl BoundingBox {
    pub fn new(top: f32, right: f32, bottom: f32, left: f32) -> Self {
        Self { top, right, bottom, left }
    }

    /// Center point as `(x, y)`.
    pub fn center(&self) -> (f32, f32) {
        ((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    /// Euclidean distance between the centers of two boxes.
    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from([top, right, bottom, left]: [f32; 4]) -> Self {
        Self { top, right, bottom, left }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.top, b.right, b.bottom, b.left]
    }
}

/// Face embedding vector. Dimension is fixed by the detector (typically 128).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Callers must check that dimensions agree; extra trailing values are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One candidate face found in a photo.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// A known identity and its reference embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub name: String,
    pub embedding: Embedding,
}

/// Attendance classification. Declaration order is roster order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Unknown,
    Error,
}

impl AttendanceStatus {
    /// Position in the roster: Present, Absent, Unknown, Error.
    pub fn priority(self) -> u8 {
        match self {
            AttendanceStatus::Present => 0,
            AttendanceStatus::Absent => 1,
            AttendanceStatus::Unknown => 2,
            AttendanceStatus::Error => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
            AttendanceStatus::Unknown => "Unknown",
            AttendanceStatus::Error => "Error",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Present" => Ok(AttendanceStatus::Present),
            "Absent" => Ok(AttendanceStatus::Absent),
            "Unknown" => Ok(AttendanceStatus::Unknown),
            "Error" => Ok(AttendanceStatus::Error),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

/// One line of the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub status: AttendanceStatus,
    pub confidence: String,
    pub bbox: Option<BoundingBox>,
}

impl AttendanceRecord {
    pub fn present(name: &str, score: f32, bbox: BoundingBox) -> Self {
        Self {
            name: name.to_string(),
            status: AttendanceStatus::Present,
            confidence: format!("High ({score:.2})"),
            bbox: Some(bbox),
        }
    }

    /// Closest gallery match was within tolerance but under the acceptance floor.
    /// The name is kept for diagnostics only.
    pub fn low_confidence(name: &str, score: f32, bbox: BoundingBox) -> Self {
        Self {
            name: name.to_string(),
            status: AttendanceStatus::Unknown,
            confidence: format!("Low ({score:.2})"),
            bbox: Some(bbox),
        }
    }

    /// An accepted match for a name that is already Present in this roster.
    pub fn repeat_match(name: &str, score: f32, bbox: BoundingBox) -> Self {
        Self {
            name: name.to_string(),
            status: AttendanceStatus::Unknown,
            confidence: format!("Repeat ({score:.2})"),
            bbox: Some(bbox),
        }
    }

    /// `face_number` is the 1-based position in the detector output.
    pub fn unknown(face_number: usize, bbox: BoundingBox) -> Self {
        Self {
            name: format!("Unknown Person {face_number}"),
            status: AttendanceStatus::Unknown,
            confidence: "Low".to_string(),
            bbox: Some(bbox),
        }
    }

    pub fn error(face_number: usize, bbox: BoundingBox) -> Self {
        Self {
            name: format!("Error {face_number}"),
            status: AttendanceStatus::Error,
            confidence: "N/A".to_string(),
            bbox: Some(bbox),
        }
    }

    pub fn absent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: AttendanceStatus::Absent,
            confidence: "N/A".to_string(),
            bbox: None,
        }
    }
}
