//! One photo in, one attendance outcome out.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::gallery::GalleryStore;
use crate::roster::{build_roster, ReconcilePolicy, Roster, RosterUnavailable};
use crate::types::Detection;
use std::path::Path;

/// Closed set of results of taking attendance from a photo.
#[derive(Debug, Clone)]
pub enum AttendanceOutcome {
    Taken(Roster),
    /// No known identities are loaded.
    NoGallery,
    /// The detector found no faces in the photo.
    NoFaces,
    /// The whole run failed (detector or gallery I/O).
    Failed(String),
}

impl AttendanceOutcome {
    pub fn roster(&self) -> Option<&Roster> {
        match self {
            AttendanceOutcome::Taken(roster) => Some(roster),
            _ => None,
        }
    }

    /// Human-readable advice for the non-roster outcomes.
    pub fn guidance(&self) -> Option<String> {
        match self {
            AttendanceOutcome::Taken(_) => None,
            AttendanceOutcome::NoGallery => Some(
                "No student gallery found. Add one photo per student to the reference directory.".into(),
            ),
            AttendanceOutcome::NoFaces => Some(
                "No faces detected in the image. Check lighting, face visibility and image quality.".into(),
            ),
            AttendanceOutcome::Failed(reason) => Some(format!("Attendance processing failed: {reason}")),
        }
    }
}

impl From<RosterUnavailable> for AttendanceOutcome {
    fn from(reason: RosterUnavailable) -> Self {
        match reason {
            RosterUnavailable::NoGallery => AttendanceOutcome::NoGallery,
            RosterUnavailable::NoFaces => AttendanceOutcome::NoFaces,
        }
    }
}

/// Reconcile the faces in `image` against the store's gallery.
///
/// Polls the reference directory first, then works on one gallery snapshot
/// for the rest of the run.
pub fn take_attendance<A: FaceAnalyzer + ?Sized>(
    store: &GalleryStore,
    analyzer: &mut A,
    image: &Path,
    policy: &ReconcilePolicy,
) -> AttendanceOutcome {
    if let Err(e) = store.check_and_reload(analyzer) {
        tracing::error!(error = %e, "gallery reload failed");
        return AttendanceOutcome::Failed(e.to_string());
    }

    let gallery = store.snapshot();
    if gallery.is_empty() {
        tracing::warn!("no known identities loaded");
        return AttendanceOutcome::NoGallery;
    }

    let detections = match detect(analyzer, image) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(image = %image.display(), error = %e, "face detection failed");
            return AttendanceOutcome::Failed(e.to_string());
        }
    };
    tracing::info!(
        image = %image.display(),
        faces = detections.len(),
        identities = gallery.len(),
        "comparing detected faces"
    );

    match build_roster(analyzer, &gallery, &detections, policy) {
        Ok(roster) => {
            let s = &roster.summary;
            tracing::info!(
                present = s.present,
                absent = s.absent,
                unknown = s.unknown,
                errors = s.errored,
                "attendance taken"
            );
            AttendanceOutcome::Taken(roster)
        }
        Err(reason) => {
            tracing::info!(image = %image.display(), ?reason, "no roster produced");
            reason.into()
        }
    }
}

fn detect<A: FaceAnalyzer + ?Sized>(
    analyzer: &mut A,
    image: &Path,
) -> Result<Vec<Detection>, AnalyzerError> {
    let boxes = analyzer.detect_faces(image)?;
    if boxes.is_empty() {
        return Ok(Vec::new());
    }

    let embeddings = analyzer.extract_embeddings(image, &boxes)?;
    if embeddings.len() != boxes.len() {
        return Err(AnalyzerError::Misaligned {
            boxes: boxes.len(),
            embeddings: embeddings.len(),
        });
    }

    Ok(boxes
        .into_iter()
        .zip(embeddings)
        .map(|(bbox, embedding)| Detection { bbox, embedding })
        .collect())
}
