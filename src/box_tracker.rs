//! Individual bounding box tracker using a Kalman filter
//!
//! Besides the filter, each tracker remembers its recent real observations.
//! They drive the observation-centric momentum: the motion direction is
//! measured between observations `delta_t` frames apart rather than read off
//! the filter's velocity, which drifts during occlusions.

use crate::bbox::{speed_direction, Bbox, Velocity};
use crate::error::Result;
use crate::kalman::{KalmanFilter, KalmanFilterParams};
use crate::types::{Detection, TrackOutput};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

/// Initial state covariance diagonal, large on the unobserved velocities
const INITIAL_COVARIANCE: [f32; 7] = [10.0, 10.0, 10.0, 10.0, 10000.0, 10000.0, 10000.0];

#[derive(Debug, Clone)]
pub struct KalmanBoxTrackerParams {
    pub id: u64,
    pub detection: Detection,
    /// Frame distance used for the motion direction
    pub delta_t: u32,
    /// Bound on the filter's observation history
    pub history_len: usize,
    /// Diagonal of the measurement noise covariance matrix
    /// i.e. uncertainties of (x, y, s, r) measurements
    /// default = [1., 1., 10., 10.]
    pub meas_var: Option<[f32; 4]>,
    /// Diagonal of the process noise covariance matrix
    /// i.e. uncertainties of (x, y, s, r, dx, dy, ds) during transition
    /// default = [1., 1., 1., 1., 0.01, 0.01, 0.0001]
    pub proc_var: Option<[f32; 7]>,
}

#[derive(Debug, Clone)]
pub struct KalmanBoxTracker {
    /// track id, 0-based
    pub id: u64,
    pub class_id: i32,
    /// confidence of the last matched detection
    pub confidence: f32,
    /// source index of the last matched detection
    pub source_index: usize,
    /// Kalman filter tracking bbox state
    kf: KalmanFilter<f32>,
    /// number of steps tracker has been run for (each predict() is one step)
    pub age: u32,
    /// number of steps with matching detection box
    pub hits: u32,
    /// number of consecutive steps with matched box
    pub hit_streak: u32,
    /// number of consecutive steps predicted without receiving box
    pub time_since_update: u32,
    delta_t: u32,
    last_observation: Option<Bbox<f32>>,
    /// real observations keyed by the age they were made at
    observations: BTreeMap<u32, Bbox<f32>>,
    velocity: Velocity,
}

impl KalmanBoxTracker {
    /// Create new Kalman filter-based bbox tracker
    pub fn new(p: KalmanBoxTrackerParams) -> Self {
        let meas_var = p.meas_var.unwrap_or([1.0, 1.0, 10.0, 10.0]);
        let proc_var = p
            .proc_var
            .unwrap_or([1.0, 1.0, 1.0, 1.0, 0.01, 0.01, 0.0001]);

        // State: [center_x, center_y, area, aspect_ratio, vel_x, vel_y, vel_area]
        let initial_state = {
            let z = p.detection.bbox.to_z();
            DVector::from_vec(vec![z[0], z[1], z[2], z[3], 0.0, 0.0, 0.0])
        };

        let params = KalmanFilterParams {
            dim_x: 7, // center_x, center_y, area, aspect_ratio, vel_x, vel_y, vel_area
            dim_z: 4, // center_x, center_y, area, aspect_ratio
            x: initial_state,
            p: DMatrix::from_diagonal(&DVector::from_row_slice(&INITIAL_COVARIANCE)),
            f: DMatrix::from_row_slice(
                7,
                7,
                &[
                    1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, // center_x' = center_x + vel_x
                    0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, // center_y' = center_y + vel_y
                    0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, // area' = area + vel_area
                    0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, // aspect_ratio' = aspect_ratio
                    0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, // vel_x' = vel_x
                    0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, // vel_y' = vel_y
                    0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, // vel_area' = vel_area
                ],
            ),
            h: DMatrix::identity(4, 7),
            r: DMatrix::from_diagonal(&DVector::from_row_slice(&meas_var)),
            q: DMatrix::from_diagonal(&DVector::from_row_slice(&proc_var)),
            history_len: p.history_len,
        };

        KalmanBoxTracker {
            id: p.id,
            class_id: p.detection.class_id,
            confidence: p.detection.confidence,
            source_index: p.detection.source_index,
            kf: KalmanFilter::new(params),
            age: 0,
            hits: 0,
            hit_streak: 0,
            time_since_update: 0,
            delta_t: p.delta_t.max(1),
            last_observation: None,
            observations: BTreeMap::new(),
            velocity: Velocity::default(),
        }
    }

    /// Update tracker with a matched detection, or register a miss with `None`
    ///
    /// Misses only reach the filter; the streak counters are aged in
    /// [`KalmanBoxTracker::predict`].
    pub fn update(&mut self, detection: Option<&Detection>) -> Result<()> {
        let Some(det) = detection else {
            return self.kf.update(None);
        };

        if self.last_observation.is_some() {
            if let Some(previous) = self.k_previous_obs() {
                self.velocity = speed_direction(&previous, &det.bbox);
            }
        }

        self.last_observation = Some(det.bbox);
        self.observations.insert(self.age, det.bbox);
        let oldest = self.age.saturating_sub(self.delta_t);
        self.observations.retain(|&age, _| age >= oldest);

        self.time_since_update = 0;
        self.hits += 1;
        self.hit_streak += 1;
        self.class_id = det.class_id;
        self.confidence = det.confidence;
        self.source_index = det.source_index;

        let z = det.bbox.to_z();
        self.kf.update(Some(DVector::from_row_slice(&z)))
    }

    /// Predict box position in next step
    pub fn predict(&mut self) -> Bbox<f32> {
        // Predict area velocity close to zero to avoid negative areas
        if self.kf.x[6] + self.kf.x[2] <= 0.0 {
            self.kf.x[6] = 0.0;
        }

        self.kf.predict();
        self.age += 1;

        if self.time_since_update > 0 {
            self.hit_streak = 0;
        }
        self.time_since_update += 1;

        self.bbox()
    }

    /// Get current bbox from Kalman filter state
    pub fn bbox(&self) -> Bbox<f32> {
        let state = self.kf.get_state();
        let z = [state[0], state[1], state[2], state[3]];
        Bbox::from_z(&z)
    }

    /// Observation `delta_t` frames back, or the closest younger one. Outside
    /// that window the oldest kept observation is used.
    pub fn k_previous_obs(&self) -> Option<Bbox<f32>> {
        (1..=self.delta_t)
            .rev()
            .filter_map(|dt| self.age.checked_sub(dt))
            .find_map(|age| self.observations.get(&age).copied())
            .or_else(|| self.observations.values().next().copied())
            .or(self.last_observation)
    }

    /// Last real observation, `None` until the first match after birth
    pub fn last_observation(&self) -> Option<Bbox<f32>> {
        self.last_observation
    }

    /// Motion direction between recent observations (zero before two exist)
    pub fn velocity(&self) -> Velocity {
        self.velocity
    }

    /// Whether the filter is holding an occlusion snapshot
    pub fn is_occluded(&self) -> bool {
        self.kf.is_frozen()
    }

    /// Output record, preferring the last real observation over the filter state
    pub fn output(&self) -> TrackOutput {
        TrackOutput {
            bbox: self.last_observation.unwrap_or_else(|| self.bbox()),
            track_id: self.id + 1,
            class_id: self.class_id,
            confidence: self.confidence,
            source_index: self.source_index,
        }
    }
}

#[cfg(test)]
impl KalmanBoxTracker {
    /// Zero every covariance so the next measurement update cannot invert S
    pub(crate) fn zero_covariances(&mut self) {
        self.kf.p.fill(0.0);
        self.kf.q.fill(0.0);
        self.kf.r.fill(0.0);
    }
}
