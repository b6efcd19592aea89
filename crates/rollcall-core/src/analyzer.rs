//! External face detection / embedding capability.
//!
//! Rollcall never finds faces or computes embeddings itself. A
//! [`FaceAnalyzer`] supplies bounding boxes and embeddings for an image; the
//! comparison primitives have Euclidean defaults that implementations may
//! override to match their own metric.

use crate::types::{BoundingBox, Embedding};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("image not readable: {0}")]
    ImageUnreadable(String),
    #[error("detector failed: {0}")]
    DetectionFailed(String),
    #[error("embedding has {found} dimensions, gallery expects {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("embedding contains non-finite values")]
    NonFiniteEmbedding,
    #[error("detector returned {embeddings} embeddings for {boxes} faces")]
    Misaligned { boxes: usize, embeddings: usize },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Contract of the external detector.
pub trait FaceAnalyzer {
    /// Locate faces in an image.
    fn detect_faces(&mut self, image: &Path) -> Result<Vec<BoundingBox>, AnalyzerError>;

    /// Compute one embedding per box, aligned with `boxes`.
    fn extract_embeddings(
        &mut self,
        image: &Path,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, AnalyzerError>;

    /// Distance from `probe` to every gallery embedding, in gallery order.
    fn embedding_distance(
        &self,
        gallery: &[Embedding],
        probe: &Embedding,
    ) -> Result<Vec<f32>, AnalyzerError> {
        gallery
            .iter()
            .map(|known| {
                if known.dim() != probe.dim() {
                    return Err(AnalyzerError::DimensionMismatch {
                        expected: known.dim(),
                        found: probe.dim(),
                    });
                }
                let distance = known.euclidean_distance(probe);
                if distance.is_finite() {
                    Ok(distance)
                } else {
                    Err(AnalyzerError::NonFiniteEmbedding)
                }
            })
            .collect()
    }

    /// Per gallery entry: is it within `tolerance` of `probe`?
    fn compare_embeddings(
        &self,
        gallery: &[Embedding],
        probe: &Embedding,
        tolerance: f32,
    ) -> Result<Vec<bool>, AnalyzerError> {
        Ok(self
            .embedding_distance(gallery, probe)?
            .into_iter()
            .map(|d| d <= tolerance)
            .collect())
    }

    /// Embedding of the first face found in a single reference image, if any.
    fn embed_reference(&mut self, image: &Path) -> Result<Option<Embedding>, AnalyzerError> {
        let boxes = self.detect_faces(image)?;
        if boxes.is_empty() {
            return Ok(None);
        }
        let embeddings = self.extract_embeddings(image, &boxes)?;
        Ok(embeddings.into_iter().next())
    }
}

impl<A: FaceAnalyzer + ?Sized> FaceAnalyzer for Box<A> {
    fn detect_faces(&mut self, image: &Path) -> Result<Vec<BoundingBox>, AnalyzerError> {
        (**self).detect_faces(image)
    }

    fn extract_embeddings(
        &mut self,
        image: &Path,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, AnalyzerError> {
        (**self).extract_embeddings(image, boxes)
    }

    fn embedding_distance(
        &self,
        gallery: &[Embedding],
        probe: &Embedding,
    ) -> Result<Vec<f32>, AnalyzerError> {
        (**self).embedding_distance(gallery, probe)
    }

    fn compare_embeddings(
        &self,
        gallery: &[Embedding],
        probe: &Embedding,
        tolerance: f32,
    ) -> Result<Vec<bool>, AnalyzerError> {
        (**self).compare_embeddings(gallery, probe, tolerance)
    }

    fn embed_reference(&mut self, image: &Path) -> Result<Option<Embedding>, AnalyzerError> {
        (**self).embed_reference(image)
    }
}
