//! Collapse detector hits that land on the same physical face.

use crate::types::Detection;

pub const DEFAULT_DEDUP_RADIUS_PX: f32 = 50.0;

/// Indices of detections that survive deduplication, in input order.
///
/// A detection is dropped when its box center lies strictly closer than
/// `radius` pixels to the center of a detection already kept, so the earlier
/// hit always wins. Quadratic in the number of kept faces.
pub fn deduplicate(detections: &[Detection], radius: f32) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::with_capacity(detections.len());

    for (i, det) in detections.iter().enumerate() {
        let duplicate_of = kept
            .iter()
            .copied()
            .find(|&k| det.bbox.center_distance(&detections[k].bbox) < radius);

        match duplicate_of {
            Some(k) => tracing::debug!(face = i + 1, kept = k + 1, "dropping duplicate detection"),
            None => kept.push(i),
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding};

    fn det_at(cx: f32, cy: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(cy - 20.0, cx + 20.0, cy + 20.0, cx - 20.0),
            embedding: Embedding::new(vec![0.0; 4]),
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(deduplicate(&[], DEFAULT_DEDUP_RADIUS_PX).is_empty());
    }

    #[test]
    fn test_49_px_collapses() {
        let dets = vec![det_at(100.0, 100.0), det_at(149.0, 100.0)];
        assert_eq!(deduplicate(&dets, DEFAULT_DEDUP_RADIUS_PX), vec![0]);
    }

    #[test]
    fn test_51_px_survives() {
        let dets = vec![det_at(100.0, 100.0), det_at(151.0, 100.0)];
        assert_eq!(deduplicate(&dets, DEFAULT_DEDUP_RADIUS_PX), vec![0, 1]);
    }

    #[test]
    fn test_exactly_radius_survives() {
        let dets = vec![det_at(100.0, 100.0), det_at(100.0, 150.0)];
        assert_eq!(deduplicate(&dets, DEFAULT_DEDUP_RADIUS_PX), vec![0, 1]);
    }

    #[test]
    fn test_compares_only_against_kept() {
        // 1 is a duplicate of 0; 2 is near 1 but 60 px from 0, so it is kept.
        let dets = vec![det_at(0.0, 0.0), det_at(30.0, 0.0), det_at(60.0, 0.0)];
        assert_eq!(deduplicate(&dets, DEFAULT_DEDUP_RADIUS_PX), vec![0, 2]);
    }

    #[test]
    fn test_preserves_order() {
        let dets = vec![det_at(300.0, 0.0), det_at(0.0, 0.0), det_at(150.0, 0.0), det_at(5.0, 5.0)];
        assert_eq!(deduplicate(&dets, DEFAULT_DEDUP_RADIUS_PX), vec![0, 1, 2]);
    }
}
