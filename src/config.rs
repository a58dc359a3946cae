//! Tracker configuration
//!
//! Parameters arrive either as a typed [`TrackerConfig`] (serde friendly, so
//! partial JSON/TOML documents fill in defaults) or as the flat string map
//! handed over by a pipeline element, parsed by [`TrackerConfig::from_params`].

use crate::bbox::{giou_batch, iou_batch, Bbox};
use crate::error::{Result, TrackerError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Pairwise similarity function over two box sets
pub type SimilarityFn = fn(&[Bbox<f32>], &[Bbox<f32>]) -> Array2<f32>;

/// Similarity metric used by the primary association pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationMetric {
    #[default]
    Iou,
    Giou,
}

impl AssociationMetric {
    pub fn batch_fn(self) -> SimilarityFn {
        match self {
            AssociationMetric::Iou => iou_batch,
            AssociationMetric::Giou => giou_batch,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssociationMetric::Iou => "iou",
            AssociationMetric::Giou => "giou",
        }
    }
}

impl FromStr for AssociationMetric {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "iou" => Ok(AssociationMetric::Iou),
            "giou" => Ok(AssociationMetric::Giou),
            _ => Err(TrackerError::config("asso_func", s, "expected `iou` or `giou`")),
        }
    }
}

impl fmt::Display for AssociationMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the observation-centric tracker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum frames to keep a track alive without matching detections
    pub max_age: u32,
    /// Minimum consecutive hits before a track is reported
    pub min_hits: u32,
    /// Minimum similarity for a solved pair to count as a match
    pub iou_threshold: f32,
    /// Detections above this confidence are high-confidence
    pub det_thresh: f32,
    /// Frame distance of the observation used for the velocity direction
    pub delta_t: u32,
    /// Weight of the direction consistency term
    pub inertia: f32,
    /// Run the low-confidence recovery pass
    pub use_byte: bool,
    #[serde(alias = "asso_func")]
    pub association_metric: AssociationMetric,
    /// Measurement noise covariance diagonal (x, y, s, r)
    pub measurement_noise: [f32; 4],
    /// Process noise covariance diagonal (x, y, s, r, dx, dy, ds)
    pub process_noise: [f32; 7],
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age: 30,
            min_hits: 3,
            iou_threshold: 0.3,
            det_thresh: 0.5,
            delta_t: 3,
            inertia: 0.2,
            use_byte: false,
            association_metric: AssociationMetric::Iou,
            measurement_noise: [1.0, 1.0, 10.0, 10.0],
            process_noise: [1.0, 1.0, 1.0, 1.0, 0.01, 0.01, 0.0001],
        }
    }
}

impl TrackerConfig {
    /// Build a config from a flat parameter map. Unknown keys are ignored,
    /// missing keys keep their defaults.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        for (key, value) in params {
            match key.as_str() {
                "max_age" => config.max_age = parse_number(key, value)?,
                "min_hits" => config.min_hits = parse_number(key, value)?,
                "iou_threshold" => config.iou_threshold = parse_number(key, value)?,
                "det_thresh" => config.det_thresh = parse_number(key, value)?,
                "delta_t" => config.delta_t = parse_number(key, value)?,
                "inertia" => config.inertia = parse_number(key, value)?,
                "use_byte" => config.use_byte = parse_bool(key, value)?,
                "asso_func" => config.association_metric = value.parse()?,
                _ => log::debug!("Ignoring unknown tracker parameter `{key}`"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the tracker cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.delta_t == 0 {
            return Err(TrackerError::config("delta_t", "0", "must be at least 1"));
        }
        let floats = [
            ("iou_threshold", self.iou_threshold),
            ("det_thresh", self.det_thresh),
            ("inertia", self.inertia),
        ];
        for (key, value) in floats {
            if !value.is_finite() {
                return Err(TrackerError::config(key, value.to_string(), "must be finite"));
            }
        }
        let noise = [
            ("measurement_noise", &self.measurement_noise[..]),
            ("process_noise", &self.process_noise[..]),
        ];
        for (key, diagonal) in noise {
            if let Some(value) = diagonal.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
                return Err(TrackerError::config(
                    key,
                    value.to_string(),
                    "must be finite and positive",
                ));
            }
        }
        Ok(())
    }

    /// Bound on every per-track history buffer
    pub fn history_len(&self) -> usize {
        self.delta_t.max(self.max_age) as usize + 2
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| TrackerError::config(key, value, e.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(TrackerError::config(key, value, "expected true/false or 1/0")),
    }
}
