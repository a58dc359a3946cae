//! Observation-centric SORT
//!
//! Each frame runs up to three association passes, each only seeing what the
//! previous ones left unmatched:
//! 1. high-confidence detections against predicted boxes, similarity plus a
//!    direction consistency term
//! 2. (optional) low-confidence detections against the remaining predicted
//!    boxes, GIoU
//! 3. remaining high-confidence detections against the remaining tracks'
//!    last real observations, GIoU

use crate::association::{associate, gated_assignment};
use crate::bbox::{giou_batch, Bbox, Velocity};
use crate::box_tracker::{KalmanBoxTracker, KalmanBoxTrackerParams};
use crate::config::{SimilarityFn, TrackerConfig};
use crate::error::Result;
use crate::lapjv::AssignmentResult;
use crate::types::{Detection, TrackOutput};
use ndarray::prelude::*;
use rayon::prelude::*;
use std::collections::HashMap;

/// Detections at or below this confidence are discarded
const LOW_SCORE_THRESHOLD: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct OcSortTracker {
    config: TrackerConfig,
    similarity: SimilarityFn,
    tracklets: Vec<KalmanBoxTracker>,
    frame_count: u32,
    next_track_id: u64,
}

impl Default for OcSortTracker {
    fn default() -> Self {
        let config = TrackerConfig::default();
        OcSortTracker {
            similarity: config.association_metric.batch_fn(),
            config,
            tracklets: Vec::new(),
            frame_count: 0,
            next_track_id: 0,
        }
    }
}

impl OcSortTracker {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        log::info!("Initialising OC-SORT tracker with {config:?}");

        Ok(OcSortTracker {
            similarity: config.association_metric.batch_fn(),
            config,
            tracklets: Vec::new(),
            frame_count: 0,
            next_track_id: 0,
        })
    }

    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        Self::new(TrackerConfig::from_params(params)?)
    }

    /// Re-initialise from a parameter map, starting a fresh tracker lifetime.
    ///
    /// On error the tracker is left untouched.
    pub fn init(&mut self, params: &HashMap<String, String>) -> Result<()> {
        *self = Self::from_params(params)?;
        Ok(())
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Live tracks in creation order
    pub fn tracks(&self) -> &[KalmanBoxTracker] {
        &self.tracklets
    }

    /// Split detections by confidence into (high, low), skipping boxes
    /// without a positive finite area
    fn split_detections(&self, detections: &[Detection]) -> (Vec<Detection>, Vec<Detection>) {
        let det_thresh = self.config.det_thresh;
        let usable: Vec<&Detection> = detections
            .iter()
            .filter(|d| {
                let ok = d.bbox.is_finite() && !d.bbox.is_degenerate();
                if !ok {
                    log::debug!("Skipping degenerate detection {}", d.bbox);
                }
                ok
            })
            .collect();

        let high = usable
            .iter()
            .filter(|d| d.confidence > det_thresh)
            .map(|&&d| d)
            .collect();
        let low = usable
            .iter()
            .filter(|d| d.confidence > LOW_SCORE_THRESHOLD && d.confidence <= det_thresh)
            .map(|&&d| d)
            .collect();
        (high, low)
    }

    /// Parallel prediction, dropping tracks whose prediction is not finite
    fn predict_and_cleanup(&mut self) -> Vec<Bbox<f32>> {
        let predictions: Vec<Bbox<f32>> = self
            .tracklets
            .par_iter_mut()
            .map(|tracklet| tracklet.predict())
            .collect();

        let (tracklets, predictions): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tracklets)
            .into_iter()
            .zip(predictions)
            .filter(|(tracklet, bbox)| {
                if bbox.is_finite() {
                    true
                } else {
                    log::warn!(
                        "Dropping track {}: non-finite prediction {bbox}",
                        tracklet.id + 1
                    );
                    false
                }
            })
            .unzip();

        self.tracklets = tracklets;
        predictions
    }

    /// Apply a detection (or a miss) to one track, flagging filter failures
    fn update_tracklet(
        &mut self,
        idx: usize,
        detection: Option<&Detection>,
        failed: &mut [bool],
    ) {
        let tracklet = &mut self.tracklets[idx];
        if let Err(e) = tracklet.update(detection) {
            log::warn!("Track {} update failed: {e}", tracklet.id + 1);
            failed[idx] = true;
        }
    }

    fn create_tracklet(&mut self, detection: &Detection) {
        let tracklet = KalmanBoxTracker::new(KalmanBoxTrackerParams {
            id: self.next_track_id,
            detection: *detection,
            delta_t: self.config.delta_t,
            history_len: self.config.history_len(),
            meas_var: Some(self.config.measurement_noise),
            proc_var: Some(self.config.process_noise),
        });
        self.tracklets.push(tracklet);
        self.next_track_id += 1;
    }

    /// Run one frame of tracking and return the confirmed tracks
    pub fn update(&mut self, detections: &[Detection]) -> Vec<TrackOutput> {
        self.frame_count += 1;
        let iou_threshold = self.config.iou_threshold;

        let (high_dets, low_dets) = self.split_detections(detections);
        let predictions = self.predict_and_cleanup();

        let velocities: Vec<Velocity> = self.tracklets.iter().map(|t| t.velocity()).collect();
        let last_observations: Vec<Option<Bbox<f32>>> =
            self.tracklets.iter().map(|t| t.last_observation()).collect();
        let k_previous: Vec<Option<Bbox<f32>>> =
            self.tracklets.iter().map(|t| t.k_previous_obs()).collect();

        let mut failed = vec![false; self.tracklets.len()];

        // Pass 1: high confidence detections against predictions
        let high_boxes: Vec<Bbox<f32>> = high_dets.iter().map(|d| d.bbox).collect();
        let high_scores: Vec<f32> = high_dets.iter().map(|d| d.confidence).collect();
        let first = or_unmatched(
            "primary",
            associate(
                &high_boxes,
                &high_scores,
                &predictions,
                &velocities,
                &k_previous,
                iou_threshold,
                self.config.inertia,
                self.similarity,
            ),
            high_dets.len(),
            predictions.len(),
        );
        for &(d, t) in &first.assignments {
            self.update_tracklet(t, Some(&high_dets[d]), &mut failed);
        }
        let mut unmatched_dets = first.unassigned_detections;
        let mut unmatched_trks = first.unassigned_tracks;
        let mut matched = first.assignments.len();

        // Pass 2: low confidence detections against the remaining predictions
        if self.config.use_byte && !low_dets.is_empty() && !unmatched_trks.is_empty() {
            let low_boxes: Vec<Bbox<f32>> = low_dets.iter().map(|d| d.bbox).collect();
            let trk_boxes: Vec<Bbox<f32>> =
                unmatched_trks.iter().map(|&t| predictions[t]).collect();
            let giou = giou_batch(&low_boxes, &trk_boxes);

            let second = or_unmatched(
                "low confidence",
                gated_assignment(giou.view(), iou_threshold),
                low_boxes.len(),
                trk_boxes.len(),
            );
            for &(d, t) in &second.assignments {
                self.update_tracklet(unmatched_trks[t], Some(&low_dets[d]), &mut failed);
            }
            matched += second.assignments.len();
            unmatched_trks = second
                .unassigned_tracks
                .iter()
                .map(|&t| unmatched_trks[t])
                .collect();
        }

        // Pass 3: remaining high confidence detections against last observations
        let candidates: Vec<usize> = unmatched_trks
            .iter()
            .copied()
            .filter(|&t| last_observations[t].is_some())
            .collect();
        if !unmatched_dets.is_empty() && !candidates.is_empty() {
            let det_boxes: Vec<Bbox<f32>> =
                unmatched_dets.iter().map(|&d| high_dets[d].bbox).collect();
            let last_boxes: Vec<Bbox<f32>> =
                candidates.iter().filter_map(|&t| last_observations[t]).collect();
            let giou = giou_batch(&det_boxes, &last_boxes);

            let third = or_unmatched(
                "re-association",
                gated_assignment(giou.view(), iou_threshold),
                det_boxes.len(),
                last_boxes.len(),
            );
            for &(d, t) in &third.assignments {
                let detection = &high_dets[unmatched_dets[d]];
                self.update_tracklet(candidates[t], Some(detection), &mut failed);
            }
            matched += third.assignments.len();

            let rematched: Vec<usize> =
                third.assignments.iter().map(|&(_, t)| candidates[t]).collect();
            unmatched_trks.retain(|t| !rematched.contains(t));
            unmatched_dets = third
                .unassigned_detections
                .iter()
                .map(|&d| unmatched_dets[d])
                .collect();
        }

        log::debug!(
            "Frame {}: {} high / {} low detections, {} tracks, {} matched, {} new",
            self.frame_count,
            high_dets.len(),
            low_dets.len(),
            predictions.len(),
            matched,
            unmatched_dets.len()
        );

        for &t in &unmatched_trks {
            self.update_tracklet(t, None, &mut failed);
        }
        for &d in &unmatched_dets {
            self.create_tracklet(&high_dets[d]);
        }

        self.emit_and_reap(&failed)
    }

    /// Drop expired or failed tracks and report the confirmed ones
    fn emit_and_reap(&mut self, failed: &[bool]) -> Vec<TrackOutput> {
        let max_age = self.config.max_age;
        let min_hits = self.config.min_hits;
        let warming_up = self.frame_count <= min_hits;

        let mut outputs = Vec::new();
        let mut idx = 0;
        self.tracklets.retain(|tracklet| {
            let track_failed = failed.get(idx).copied().unwrap_or(false);
            idx += 1;

            if track_failed {
                log::warn!("Dropping track {} after a failed filter update", tracklet.id + 1);
                return false;
            }
            if tracklet.time_since_update > max_age {
                return false;
            }
            if tracklet.time_since_update < 1 && (tracklet.hit_streak >= min_hits || warming_up) {
                outputs.push(tracklet.output());
            }
            true
        });
        outputs
    }

    /// Array interface: rows of `[x1, y1, x2, y2, conf, class?, source_index?]`
    /// in, rows of `[x1, y1, x2, y2, track_id, class, conf, source_index]` out.
    ///
    /// Batches with fewer than 5 columns count as a frame without detections.
    pub fn update_array(&mut self, detection_boxes: ArrayView2<f32>) -> Array2<f32> {
        let detections: Vec<Detection> = if detection_boxes.ncols() < 5 {
            Vec::new()
        } else {
            detection_boxes
                .outer_iter()
                .enumerate()
                .filter_map(|(i, row)| Detection::from_row(&row.to_vec(), i))
                .collect()
        };

        let rows: Vec<[f32; TrackOutput::ROW_LEN]> = self
            .update(&detections)
            .iter()
            .map(TrackOutput::to_row)
            .collect();
        Array2::from_shape_fn((rows.len(), TrackOutput::ROW_LEN), |(i, j)| rows[i][j])
    }

    /// Remove all tracks. Ids keep counting up from where they were.
    pub fn clear_trackers(&mut self) {
        self.tracklets.clear();
    }

    /// Remove a track by its reported (1-based) id
    pub fn remove_tracker(&mut self, track_id: u64) {
        self.tracklets.retain(|t| t.id + 1 != track_id);
    }

    pub fn num_tracklets(&self) -> usize {
        self.tracklets.len()
    }

    pub fn get_step_count(&self) -> u32 {
        self.frame_count
    }
}

/// Log a failed association pass and treat it as matching nothing
fn or_unmatched(
    pass: &str,
    result: Result<AssignmentResult>,
    rows: usize,
    cols: usize,
) -> AssignmentResult {
    result.unwrap_or_else(|e| {
        log::error!("Aborting {pass} association pass: {e}");
        AssignmentResult::unmatched(rows, cols)
    })
}
