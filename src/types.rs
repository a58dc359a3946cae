//! Per-frame input and output records of a tracker

use crate::bbox::Bbox;
use serde::{Deserialize, Serialize};

/// A detected object in the current frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: Bbox<f32>,
    pub confidence: f32,
    pub class_id: i32,
    /// Position of the detection in the caller's own object list
    pub source_index: usize,
}

impl Detection {
    pub fn new(bbox: Bbox<f32>, confidence: f32, class_id: i32, source_index: usize) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
            source_index,
        }
    }

    /// Parse a `[x1, y1, x2, y2, conf, class?, source_index?]` row.
    ///
    /// Returns `None` for rows with fewer than 5 values.
    pub fn from_row(row: &[f32], row_index: usize) -> Option<Self> {
        if row.len() < 5 {
            return None;
        }
        let class_id = row.get(5).map_or(0, |&c| c as i32);
        let source_index = match row.get(6) {
            Some(&idx) if idx >= 0.0 => idx as usize,
            _ => row_index,
        };
        Some(Self::new(
            Bbox::new(row[0], row[1], row[2], row[3]),
            row[4],
            class_id,
            source_index,
        ))
    }
}

/// A confirmed track reported for the current frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackOutput {
    pub bbox: Bbox<f32>,
    /// 1-based track identity
    pub track_id: u64,
    pub class_id: i32,
    pub confidence: f32,
    pub source_index: usize,
}

impl TrackOutput {
    /// Number of values in [`TrackOutput::to_row`]
    pub const ROW_LEN: usize = 8;

    /// `[x1, y1, x2, y2, track_id, class, conf, source_index]`
    pub fn to_row(&self) -> [f32; Self::ROW_LEN] {
        let [x1, y1, x2, y2] = self.bbox.to_bounds();
        [
            x1,
            y1,
            x2,
            y2,
            self.track_id as f32,
            self.class_id as f32,
            self.confidence,
            self.source_index as f32,
        ]
    }
}
