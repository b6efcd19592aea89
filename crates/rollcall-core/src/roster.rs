//! Roster assembly: dedup, match, complete with absentees, order.

use crate::analyzer::FaceAnalyzer;
use crate::dedup::{self, DEFAULT_DEDUP_RADIUS_PX};
use crate::gallery::Gallery;
use crate::matcher::{MatchOutcome, Matcher, DEFAULT_ACCEPTANCE_THRESHOLD, DEFAULT_MATCH_TOLERANCE};
use crate::types::{AttendanceRecord, AttendanceStatus, Detection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Tunable thresholds for one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilePolicy {
    pub match_tolerance: f32,
    pub acceptance_threshold: f32,
    pub dedup_radius_px: f32,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            match_tolerance: DEFAULT_MATCH_TOLERANCE,
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            dedup_radius_px: DEFAULT_DEDUP_RADIUS_PX,
        }
    }
}

impl ReconcilePolicy {
    pub fn matcher(&self) -> Matcher {
        Matcher::new(self.match_tolerance, self.acceptance_threshold)
    }
}

/// Why no roster could be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterUnavailable {
    NoGallery,
    NoFaces,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RosterSummary {
    pub present: usize,
    pub absent: usize,
    pub unknown: usize,
    pub errored: usize,
    /// Gallery size at the time of the run.
    pub total_students: usize,
    /// Raw detector output, before deduplication.
    pub faces_detected: usize,
    pub duplicates_dropped: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Roster {
    pub records: Vec<AttendanceRecord>,
    pub summary: RosterSummary,
}

impl Roster {
    pub fn with_status(&self, status: AttendanceStatus) -> impl Iterator<Item = &AttendanceRecord> {
        self.records.iter().filter(move |r| r.status == status)
    }
}

/// Build the attendance roster for one photo.
///
/// Every gallery identity ends up exactly once as Present or Absent; every
/// surviving detection that is not an accepted first match for a name gets
/// its own Unknown or Error record. A failure while matching one face only
/// affects that face.
pub fn build_roster<A: FaceAnalyzer + ?Sized>(
    analyzer: &A,
    gallery: &Gallery,
    detections: &[Detection],
    policy: &ReconcilePolicy,
) -> Result<Roster, RosterUnavailable> {
    if gallery.is_empty() {
        return Err(RosterUnavailable::NoGallery);
    }
    if detections.is_empty() {
        return Err(RosterUnavailable::NoFaces);
    }

    let mut summary = RosterSummary {
        total_students: gallery.len(),
        faces_detected: detections.len(),
        ..Default::default()
    };

    let kept = dedup::deduplicate(detections, policy.dedup_radius_px);
    summary.duplicates_dropped = detections.len() - kept.len();
    if summary.duplicates_dropped > 0 {
        summary.warnings.push(format!(
            "{} overlapping detection(s) skipped as duplicates",
            summary.duplicates_dropped
        ));
    }

    let matcher = policy.matcher();
    let mut records = Vec::with_capacity(kept.len() + gallery.len());
    let mut present: HashSet<String> = HashSet::new();

    for idx in kept {
        let det = &detections[idx];
        let face_number = idx + 1;

        let record = match matcher.classify(analyzer, &det.embedding, gallery) {
            Ok(MatchOutcome::Accepted { name, score }) => {
                if present.insert(name.clone()) {
                    tracing::debug!(face = face_number, name = %name, score, "recognized");
                    AttendanceRecord::present(&name, score, det.bbox)
                } else {
                    summary
                        .warnings
                        .push(format!("{name} matched again by face {face_number} ({score:.2})"));
                    AttendanceRecord::repeat_match(&name, score, det.bbox)
                }
            }
            Ok(MatchOutcome::LowConfidence { name, score }) => {
                tracing::debug!(face = face_number, name = %name, score, "low confidence match");
                summary
                    .warnings
                    .push(format!("low confidence match for {name} ({score:.2})"));
                AttendanceRecord::low_confidence(&name, score, det.bbox)
            }
            Ok(MatchOutcome::Unmatched) => {
                tracing::debug!(face = face_number, "unknown face");
                AttendanceRecord::unknown(face_number, det.bbox)
            }
            Err(e) => {
                tracing::warn!(face = face_number, error = %e, "failed to match face");
                summary.errors.push(format!("face {face_number}: {e}"));
                AttendanceRecord::error(face_number, det.bbox)
            }
        };
        records.push(record);
    }

    for name in gallery.names() {
        if !present.contains(name) {
            records.push(AttendanceRecord::absent(name));
        }
    }

    // Stable: order of production is kept within a status.
    records.sort_by_key(|r| r.status.priority());

    for r in &records {
        match r.status {
            AttendanceStatus::Present => summary.present += 1,
            AttendanceStatus::Absent => summary.absent += 1,
            AttendanceStatus::Unknown => summary.unknown += 1,
            AttendanceStatus::Error => summary.errored += 1,
        }
    }

    Ok(Roster { records, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerError;
    use crate::types::{BoundingBox, Embedding, GalleryEntry};
    use std::path::Path;

    struct Euclid;

    impl FaceAnalyzer for Euclid {
        fn detect_faces(&mut self, _image: &Path) -> Result<Vec<BoundingBox>, AnalyzerError> {
            Ok(Vec::new())
        }

        fn extract_embeddings(
            &mut self,
            _image: &Path,
            _boxes: &[BoundingBox],
        ) -> Result<Vec<Embedding>, AnalyzerError> {
            Ok(Vec::new())
        }
    }

    fn gallery(entries: &[(&str, f32)]) -> Gallery {
        Gallery::new(
            entries
                .iter()
                .map(|&(name, x)| GalleryEntry {
                    name: name.to_string(),
                    embedding: Embedding::new(vec![x, 0.0]),
                })
                .collect(),
        )
        .unwrap()
    }

    fn det(cx: f32, emb: Vec<f32>) -> Detection {
        Detection {
            bbox: BoundingBox::new(0.0, cx + 20.0, 40.0, cx - 20.0),
            embedding: Embedding::new(emb),
        }
    }

    #[test]
    fn test_single_present() {
        let g = gallery(&[("Alice", 0.0)]);
        let roster = build_roster(&Euclid, &g, &[det(100.0, vec![0.1, 0.0])], &ReconcilePolicy::default())
            .unwrap();
        assert_eq!(roster.records.len(), 1);
        assert_eq!(roster.records[0].name, "Alice");
        assert_eq!(roster.records[0].status, AttendanceStatus::Present);
        assert_eq!(roster.records[0].confidence, "High (0.90)");
    }

    #[test]
    fn test_absent_completion() {
        let g = gallery(&[("Alice", 0.0), ("Bob", 5.0)]);
        let roster = build_roster(&Euclid, &g, &[det(100.0, vec![0.1, 0.0])], &ReconcilePolicy::default())
            .unwrap();
        let got: Vec<(&str, AttendanceStatus, &str)> = roster
            .records
            .iter()
            .map(|r| (r.name.as_str(), r.status, r.confidence.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("Alice", AttendanceStatus::Present, "High (0.90)"),
                ("Bob", AttendanceStatus::Absent, "N/A"),
            ]
        );
        assert!(roster.records[1].bbox.is_none());
    }

    #[test]
    fn test_sentinels() {
        let empty = Gallery::default();
        assert_eq!(
            build_roster(&Euclid, &empty, &[det(0.0, vec![0.0, 0.0])], &ReconcilePolicy::default()),
            Err(RosterUnavailable::NoGallery)
        );
        let g = gallery(&[("Alice", 0.0)]);
        assert_eq!(
            build_roster(&Euclid, &g, &[], &ReconcilePolicy::default()),
            Err(RosterUnavailable::NoFaces)
        );
    }

    #[test]
    fn test_status_order_and_counts() {
        let g = gallery(&[("Alice", 0.0), ("Bob", 5.0), ("Carol", 10.0)]);
        let dets = vec![
            det(0.0, vec![20.0, 0.0]),   // unknown
            det(200.0, vec![0.0]),       // error: dimension mismatch
            det(400.0, vec![10.05, 0.0]), // Carol
        ];
        let roster = build_roster(&Euclid, &g, &dets, &ReconcilePolicy::default()).unwrap();
        let order: Vec<(&str, AttendanceStatus)> =
            roster.records.iter().map(|r| (r.name.as_str(), r.status)).collect();
        assert_eq!(
            order,
            vec![
                ("Carol", AttendanceStatus::Present),
                ("Alice", AttendanceStatus::Absent),
                ("Bob", AttendanceStatus::Absent),
                ("Unknown Person 1", AttendanceStatus::Unknown),
                ("Error 2", AttendanceStatus::Error),
            ]
        );
        let s = &roster.summary;
        assert_eq!((s.present, s.absent, s.unknown, s.errored), (1, 2, 1, 1));
        assert_eq!(s.total_students, 3);
        assert_eq!(s.faces_detected, 3);
        assert_eq!(s.errors.len(), 1);
        assert!(s.errors[0].starts_with("face 2:"));
    }

    #[test]
    fn test_unknown_numbering_uses_raw_index() {
        let g = gallery(&[("Alice", 0.0)]);
        let dets = vec![
            det(0.0, vec![0.0, 0.0]),
            det(10.0, vec![0.0, 0.0]), // duplicate of face 1
            det(300.0, vec![9.0, 9.0]),
        ];
        let roster = build_roster(&Euclid, &g, &dets, &ReconcilePolicy::default()).unwrap();
        assert_eq!(roster.summary.duplicates_dropped, 1);
        assert!(roster.records.iter().any(|r| r.name == "Unknown Person 3"));
    }

    #[test]
    fn test_second_match_for_same_name_is_not_present() {
        let g = gallery(&[("Alice", 0.0)]);
        let dets = vec![det(0.0, vec![0.05, 0.0]), det(300.0, vec![0.1, 0.0])];
        let roster = build_roster(&Euclid, &g, &dets, &ReconcilePolicy::default()).unwrap();
        assert_eq!(roster.with_status(AttendanceStatus::Present).count(), 1);
        assert_eq!(roster.with_status(AttendanceStatus::Absent).count(), 0);
        let repeat = &roster.records[1];
        assert_eq!(repeat.status, AttendanceStatus::Unknown);
        assert_eq!(repeat.confidence, "Repeat (0.90)");
    }

    #[test]
    fn test_low_confidence_does_not_suppress_absent() {
        let g = gallery(&[("Bob", 0.0)]);
        let roster = build_roster(&Euclid, &g, &[det(0.0, vec![0.45, 0.0])], &ReconcilePolicy::default())
            .unwrap();
        let statuses: Vec<AttendanceStatus> = roster.records.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![AttendanceStatus::Absent, AttendanceStatus::Unknown]);
        assert_eq!(roster.records[1].name, "Bob");
        assert_eq!(roster.summary.warnings.len(), 1);
    }

    #[test]
    fn test_idempotent() {
        let g = gallery(&[("Alice", 0.0), ("Bob", 5.0)]);
        let dets = vec![det(0.0, vec![5.1, 0.0]), det(300.0, vec![40.0, 0.0])];
        let policy = ReconcilePolicy::default();
        let a = build_roster(&Euclid, &g, &dets, &policy).unwrap();
        let b = build_roster(&Euclid, &g, &dets, &policy).unwrap();
        assert_eq!(a, b);
    }
}
