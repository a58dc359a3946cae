//! Kalman filter implementation for tracking
//!
//! A plain linear filter extended with an observation history and an
//! occlusion snapshot. When a measurement goes missing the filter freezes a
//! copy of itself. When measurements resume it restores that copy and replays
//! a linearly interpolated virtual trajectory across the gap before applying
//! the new measurement, so the motion estimate does not jump.

use crate::bbox::scale_ratio_to_wh;
use crate::error::{Result, TrackerError};
use nalgebra::{DMatrix, DVector};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct KalmanFilterParams {
    pub dim_x: usize,    // State dimension
    pub dim_z: usize,    // Observation dimension
    pub x: DVector<f32>, // Initial state
    pub p: DMatrix<f32>, // Initial state covariance
    pub f: DMatrix<f32>, // State transition matrix
    pub h: DMatrix<f32>, // Observation matrix
    pub r: DMatrix<f32>, // Observation noise covariance
    pub q: DMatrix<f32>, // Process noise covariance
    /// Number of past measurements (or misses) kept for reprojection
    pub history_len: usize,
}

/// Filter state saved when an occlusion begins
#[derive(Debug, Clone)]
pub struct FilterSnapshot<T> {
    x: DVector<T>,
    p: DMatrix<T>,
    y: DVector<T>,
    history: VecDeque<Option<DVector<T>>>,
}

#[derive(Debug, Clone)]
pub struct KalmanFilter<T> {
    pub dim_x: usize,
    pub dim_z: usize,
    pub x: DVector<T>, // State vector
    pub p: DMatrix<T>, // State covariance matrix
    pub f: DMatrix<T>, // State transition matrix
    pub h: DMatrix<T>, // Observation matrix
    pub r: DMatrix<T>, // Observation noise covariance
    pub q: DMatrix<T>, // Process noise covariance
    pub y: DVector<T>, // Residual
    pub s: DMatrix<T>, // Innovation covariance
    pub k: DMatrix<T>, // Kalman gain
    /// Fading memory factor, 1.0 for a standard filter
    pub alpha_sq: T,
    observed: bool,
    history: VecDeque<Option<DVector<T>>>,
    history_len: usize,
    frozen: Option<FilterSnapshot<T>>,
}

impl KalmanFilter<f32> {
    pub fn new(params: KalmanFilterParams) -> Self {
        let dim_x = params.dim_x;
        let dim_z = params.dim_z;

        Self {
            dim_x,
            dim_z,
            x: params.x,
            p: params.p,
            f: params.f,
            h: params.h,
            r: params.r,
            q: params.q,
            y: DVector::zeros(dim_z),
            s: DMatrix::zeros(dim_z, dim_z),
            k: DMatrix::zeros(dim_x, dim_z),
            alpha_sq: 1.0,
            observed: false,
            history: VecDeque::with_capacity(params.history_len + 1),
            history_len: params.history_len.max(1),
            frozen: None,
        }
    }

    /// Predict the next state
    pub fn predict(&mut self) {
        // x = F * x
        self.x = &self.f * &self.x;

        // P = alpha^2 * F * P * F^T + Q
        self.p = (&self.f * &self.p * self.f.transpose()) * self.alpha_sq + &self.q;
    }

    /// Update with an observation, or register a miss with `None`
    pub fn update(&mut self, z: Option<DVector<f32>>) -> Result<()> {
        self.push_history(z.clone());

        let Some(z) = z else {
            if self.observed {
                self.freeze();
            }
            self.observed = false;
            self.y.fill(0.0);
            return Ok(());
        };

        if !self.observed {
            self.unfreeze()?;
        }
        self.observed = true;
        self.correct(&z)
    }

    /// Measurement correction with the Joseph form covariance update
    fn correct(&mut self, z: &DVector<f32>) -> Result<()> {
        // Residual: y = z - H * x
        self.y = z - &self.h * &self.x;

        // Innovation covariance: S = H * P * H^T + R
        let pht = &self.p * self.h.transpose();
        self.s = &self.h * &pht + &self.r;

        // Kalman gain: K = P * H^T * S^-1
        let s_inv = self
            .s
            .clone()
            .try_inverse()
            .ok_or(TrackerError::SingularInnovation)?;
        self.k = pht * s_inv;

        // Update state: x = x + K * y
        self.x = &self.x + &self.k * &self.y;

        // P = (I - KH) P (I - KH)^T + K R K^T
        let i_kh = DMatrix::identity(self.dim_x, self.dim_x) - &self.k * &self.h;
        self.p = &i_kh * &self.p * i_kh.transpose() + &self.k * &self.r * self.k.transpose();

        Ok(())
    }

    fn push_history(&mut self, z: Option<DVector<f32>>) {
        self.history.push_back(z);
        while self.history.len() > self.history_len {
            self.history.pop_front();
        }
    }

    /// Save the whole filter state at the start of an occlusion
    fn freeze(&mut self) {
        self.frozen = Some(FilterSnapshot {
            x: self.x.clone(),
            p: self.p.clone(),
            y: self.y.clone(),
            history: self.history.clone(),
        });
    }

    /// Restore the frozen state and replay a virtual trajectory from the last
    /// observation before the gap to the one that ended it
    fn unfreeze(&mut self) -> Result<()> {
        let Some(snapshot) = self.frozen.take() else {
            return Ok(());
        };

        let new_history = std::mem::replace(&mut self.history, snapshot.history);
        self.x = snapshot.x;
        self.p = snapshot.p;
        self.y = snapshot.y;
        self.observed = true;
        // The snapshot ends with the miss that triggered the freeze
        self.history.pop_back();

        if self.dim_z != 4 {
            return Ok(());
        }

        let mut observations = new_history
            .iter()
            .enumerate()
            .rev()
            .filter_map(|(idx, z)| z.as_ref().map(|z| (idx, z)));
        let (Some((index2, box2)), Some((index1, box1))) =
            (observations.next(), observations.next())
        else {
            return Ok(());
        };

        let (w1, h1) = scale_ratio_to_wh(box1[2], box1[3]);
        let (w2, h2) = scale_ratio_to_wh(box2[2], box2[3]);
        if ![w1, h1, w2, h2].iter().all(|v| v.is_finite() && *v > 0.0) {
            log::debug!("Skipping reprojection across degenerate boxes");
            return Ok(());
        }

        let gap = index2 - index1;
        let steps = gap as f32;
        let dx = (box2[0] - box1[0]) / steps;
        let dy = (box2[1] - box1[1]) / steps;
        let dw = (w2 - w1) / steps;
        let dh = (h2 - h1) / steps;

        for step in 1..=gap {
            let t = step as f32;
            let w = w1 + t * dw;
            let h = h1 + t * dh;
            let virtual_z =
                DVector::from_vec(vec![box1[0] + t * dx, box1[1] + t * dy, w * h, w / h]);
            self.update(Some(virtual_z))?;
            if step != gap {
                self.predict();
            }
        }
        Ok(())
    }

    /// Get current state
    pub fn get_state(&self) -> &DVector<f32> {
        &self.x
    }

    /// Whether the last update carried a measurement
    pub fn is_observed(&self) -> bool {
        self.observed
    }

    /// Whether an occlusion snapshot is held
    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    /// Recent measurements, oldest first, `None` for misses
    pub fn history(&self) -> &VecDeque<Option<DVector<f32>>> {
        &self.history
    }
}
