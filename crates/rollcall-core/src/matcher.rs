use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::gallery::Gallery;
use crate::types::Embedding;

/// Coarse cutoff: a gallery entry further than this is never a candidate.
pub const DEFAULT_MATCH_TOLERANCE: f32 = 0.5;
/// Confidence (`1 - distance`) must be strictly above this to mark someone Present.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f32 = 0.6;

/// Result of classifying one probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Closest entry is within tolerance and confident enough.
    Accepted { name: String, score: f32 },
    /// Closest entry is within tolerance but under the acceptance floor.
    LowConfidence { name: String, score: f32 },
    /// No gallery entry is within tolerance.
    Unmatched,
}

/// Distance-based matcher using the analyzer's comparison primitives.
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    pub tolerance: f32,
    pub acceptance_threshold: f32,
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_MATCH_TOLERANCE,
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
        }
    }
}

impl Matcher {
    pub fn new(tolerance: f32, acceptance_threshold: f32) -> Self {
        Self { tolerance, acceptance_threshold }
    }

    /// Classify `probe` against every gallery entry.
    ///
    /// The coarse tolerance test runs first; only if some entry passes is the
    /// globally closest entry picked (earliest entry on ties).
    pub fn classify<A: FaceAnalyzer + ?Sized>(
        &self,
        analyzer: &A,
        probe: &Embedding,
        gallery: &Gallery,
    ) -> Result<MatchOutcome, AnalyzerError> {
        let known = gallery.embeddings();

        let within = analyzer.compare_embeddings(known, probe, self.tolerance)?;
        if !within.iter().any(|&m| m) {
            return Ok(MatchOutcome::Unmatched);
        }

        let distances = analyzer.embedding_distance(known, probe)?;
        if distances.len() != known.len() {
            return Err(AnalyzerError::Misaligned {
                boxes: known.len(),
                embeddings: distances.len(),
            });
        }

        let mut best_idx: Option<usize> = None;
        let mut best_dist = f32::INFINITY;
        for (i, &d) in distances.iter().enumerate() {
            if d < best_dist {
                best_dist = d;
                best_idx = Some(i);
            }
        }

        let Some(idx) = best_idx else {
            return Ok(MatchOutcome::Unmatched);
        };

        let name = gallery.names()[idx].clone();
        let score = 1.0 - best_dist;

        if score > self.acceptance_threshold {
            Ok(MatchOutcome::Accepted { name, score })
        } else {
            Ok(MatchOutcome::LowConfidence { name, score })
        }
    }
}
