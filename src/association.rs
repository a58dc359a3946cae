//! Detection to track association on similarity matrices
//!
//! Similarities are turned into costs by negation and handed to the
//! Jonker-Volgenant solver; solved pairs below the similarity threshold are
//! rejected and reported unmatched on both sides.

use crate::bbox::{speed_direction, Bbox, Velocity};
use crate::config::SimilarityFn;
use crate::error::Result;
use crate::lapjv::{AssignmentResult, LapjvSolver};
use ndarray::{Array2, ArrayView2, Zip};
use std::f32::consts::PI;

/// Solve on `-(similarity + bonus)` and keep pairs whose similarity reaches `threshold`
pub fn linear_assignment(
    similarity: ArrayView2<f32>,
    bonus: Option<ArrayView2<f32>>,
    threshold: f32,
) -> Result<AssignmentResult> {
    let (num_dets, num_tracks) = similarity.dim();
    let cost = combined_cost(similarity, bonus);

    let solved = LapjvSolver::solve(cost.view())?;
    let accepted: Vec<(usize, usize)> = solved
        .assignments
        .into_iter()
        .filter(|&(d, t)| similarity[[d, t]] >= threshold)
        .collect();
    let total_cost = accepted.iter().map(|&(d, t)| cost[[d, t]]).sum();

    Ok(AssignmentResult::from_pairs(accepted, num_dets, num_tracks, total_cost))
}

/// Linear assignment that is skipped outright when no pair clears the threshold
pub fn gated_assignment(similarity: ArrayView2<f32>, threshold: f32) -> Result<AssignmentResult> {
    let (num_dets, num_tracks) = similarity.dim();
    let best = similarity.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if best <= threshold {
        return Ok(AssignmentResult::unmatched(num_dets, num_tracks));
    }
    linear_assignment(similarity, None, threshold)
}

/// Primary association of detections with predicted track boxes
///
/// The similarity is augmented by a direction consistency term: for every
/// pair, the direction from the track's k-previous observation to the
/// detection is compared with the track's velocity, weighted by `inertia` and
/// the detection confidence. Tracks without a previous observation get no
/// direction term.
#[allow(clippy::too_many_arguments)]
pub fn associate(
    detections: &[Bbox<f32>],
    confidences: &[f32],
    predictions: &[Bbox<f32>],
    velocities: &[Velocity],
    previous_obs: &[Option<Bbox<f32>>],
    threshold: f32,
    inertia: f32,
    metric: SimilarityFn,
) -> Result<AssignmentResult> {
    if detections.is_empty() || predictions.is_empty() {
        return Ok(AssignmentResult::unmatched(detections.len(), predictions.len()));
    }

    let similarity = metric(detections, predictions);
    let angle_cost = direction_cost(detections, confidences, velocities, previous_obs, inertia);

    if let Some(pairs) = unique_matches(similarity.view(), threshold) {
        let cost = combined_cost(similarity.view(), Some(angle_cost.view()));
        let total_cost = pairs.iter().map(|&(d, t)| cost[[d, t]]).sum();
        return Ok(AssignmentResult::from_pairs(
            pairs,
            detections.len(),
            predictions.len(),
            total_cost,
        ));
    }

    linear_assignment(similarity.view(), Some(angle_cost.view()), threshold)
}

/// Direction consistency bonus, shape (detections, tracks)
fn direction_cost(
    detections: &[Bbox<f32>],
    confidences: &[f32],
    velocities: &[Velocity],
    previous_obs: &[Option<Bbox<f32>>],
    inertia: f32,
) -> Array2<f32> {
    Array2::from_shape_fn((detections.len(), previous_obs.len()), |(d, t)| {
        let Some(previous) = &previous_obs[t] else {
            return 0.0;
        };
        let velocity = velocities.get(t).copied().unwrap_or_default();
        let direction = speed_direction(previous, &detections[d]);

        let angle = velocity.cosine(&direction).acos();
        let consistency = (PI / 2.0 - angle.abs()) / PI;
        let confidence = confidences.get(d).copied().unwrap_or(1.0);
        consistency * inertia * confidence
    })
}

fn combined_cost(similarity: ArrayView2<f32>, bonus: Option<ArrayView2<f32>>) -> Array2<f64> {
    match bonus {
        Some(bonus) => Zip::from(&similarity)
            .and(&bonus)
            .map_collect(|&s, &b| -f64::from(s + b)),
        None => similarity.mapv(|s| -f64::from(s)),
    }
}

/// The matching implied by `similarity >= threshold` when that mask has at
/// most one hit in every row and every column
fn unique_matches(similarity: ArrayView2<f32>, threshold: f32) -> Option<Vec<(usize, usize)>> {
    let mask = similarity.mapv(|s| s >= threshold);

    let unique_rows = mask
        .rows()
        .into_iter()
        .all(|row| row.iter().filter(|&&m| m).count() <= 1);
    let unique_cols = mask
        .columns()
        .into_iter()
        .all(|col| col.iter().filter(|&&m| m).count() <= 1);
    if !(unique_rows && unique_cols) {
        return None;
    }

    Some(
        mask.indexed_iter()
            .filter(|&(_, &m)| m)
            .map(|(idx, _)| idx)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::{giou_batch, iou_batch};
    use ndarray::array;

    #[test]
    fn test_linear_assignment_threshold() {
        let similarity = array![[0.9, 0.1], [0.2, 0.25]];
        let result = linear_assignment(similarity.view(), None, 0.3).unwrap();
        assert_eq!(result.assignments, vec![(0, 0)]);
        assert_eq!(result.unassigned_detections, vec![1]);
        assert_eq!(result.unassigned_tracks, vec![1]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let similarity = array![[0.3]];
        let result = linear_assignment(similarity.view(), None, 0.3).unwrap();
        assert_eq!(result.assignments, vec![(0, 0)]);
    }

    #[test]
    fn test_gated_assignment_skips_low_similarity() {
        let similarity = array![[0.3, 0.1], [0.2, -0.5]];
        let result = gated_assignment(similarity.view(), 0.3).unwrap();
        assert!(result.assignments.is_empty());
        assert_eq!(result.unassigned_detections, vec![0, 1]);
    }

    #[test]
    fn test_solver_error_surfaces() {
        let similarity = array![[f32::NAN, 0.5], [0.6, 0.7]];
        assert!(linear_assignment(similarity.view(), None, 0.3).is_err());
    }

    #[test]
    fn test_unique_matches() {
        let similarity = array![[0.9, 0.0, 0.0], [0.0, 0.0, 0.8]];
        assert_eq!(unique_matches(similarity.view(), 0.3), Some(vec![(0, 0), (1, 2)]));

        let conflicting = array![[0.9, 0.5], [0.6, 0.0]];
        assert_eq!(unique_matches(conflicting.view(), 0.3), None);
    }

    #[test]
    fn test_associate_empty_inputs() {
        let boxes = [Bbox::new(0.0, 0.0, 10.0, 10.0)];
        let result = associate(
            &[],
            &[],
            &boxes,
            &[Velocity::default()],
            &[None],
            0.3,
            0.2,
            iou_batch,
        )
        .unwrap();
        assert!(result.assignments.is_empty());
        assert_eq!(result.unassigned_tracks, vec![0]);

        let result = associate(&boxes, &[0.9], &[], &[], &[], 0.3, 0.2, iou_batch).unwrap();
        assert_eq!(result.unassigned_detections, vec![0]);
    }

    #[test]
    fn test_direction_breaks_ambiguity() {
        // Two crossing tracks predicted at the same place: track 0 came from
        // the left moving right, track 1 from the right moving left
        let predictions = [Bbox::new(30.0, 0.0, 70.0, 10.0), Bbox::new(30.0, 0.0, 70.0, 10.0)];
        let velocities = [Velocity { dx: 1.0, dy: 0.0 }, Velocity { dx: -1.0, dy: 0.0 }];
        let previous = [
            Some(Bbox::new(25.0, 0.0, 65.0, 10.0)),
            Some(Bbox::new(35.0, 0.0, 75.0, 10.0)),
        ];
        // Equal IoU with both predictions; only the direction tells them apart
        let detections = [Bbox::new(22.0, 0.0, 62.0, 10.0), Bbox::new(38.0, 0.0, 78.0, 10.0)];

        let result = associate(
            &detections,
            &[0.9, 0.9],
            &predictions,
            &velocities,
            &previous,
            0.3,
            0.5,
            iou_batch,
        )
        .unwrap();
        assert_eq!(result.assignments, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_associate_accepts_pair_at_threshold() {
        // IoU of exactly 0.5, a unique mask hit
        let detections = [Bbox::new(0.0, 0.0, 5.0, 10.0)];
        let predictions = [Bbox::new(0.0, 0.0, 10.0, 10.0)];
        assert_eq!(iou_batch(&detections, &predictions)[[0, 0]], 0.5);

        let result = associate(
            &detections,
            &[0.9],
            &predictions,
            &[Velocity::default()],
            &[None],
            0.5,
            0.2,
            iou_batch,
        )
        .unwrap();
        let solved = linear_assignment(iou_batch(&detections, &predictions).view(), None, 0.5)
            .unwrap();
        assert_eq!(result.assignments, vec![(0, 0)]);
        assert_eq!(result.assignments, solved.assignments);
    }

    #[test]
    fn test_unique_matches_inclusive_mask() {
        let similarity = array![[0.3, 0.0], [0.0, 0.29]];
        assert_eq!(unique_matches(similarity.view(), 0.3), Some(vec![(0, 0)]));
    }

    #[test]
    fn test_no_direction_term_without_previous_observation() {
        let detections = [Bbox::new(0.0, 0.0, 10.0, 10.0)];
        let velocity = [Velocity { dx: 1.0, dy: 0.0 }];
        let cost = direction_cost(&detections, &[1.0], &velocity, &[None], 0.2);
        assert_eq!(cost[[0, 0]], 0.0);
    }

    #[test]
    fn test_giou_recovers_disjoint_neighbour() {
        let last_seen = [Bbox::new(0.0, 0.0, 10.0, 10.0)];
        let nearby = [Bbox::new(10.5, 0.0, 20.5, 10.0)];
        assert_eq!(iou_batch(&nearby, &last_seen)[[0, 0]], 0.0);

        let giou = giou_batch(&nearby, &last_seen);
        let result = gated_assignment(giou.view(), -0.1).unwrap();
        assert_eq!(result.assignments, vec![(0, 0)]);
    }
}
