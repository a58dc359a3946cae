//! Multi-object tracking implementations
//!
//! Trackers are selected by name through [`create_tracker`]. The set of
//! implementations is closed and listed in [`TrackerKind`]; currently:
//! - OcSortTracker: observation-centric SORT with occlusion reprojection

use crate::error::{Result, TrackerError};
use crate::types::{Detection, TrackOutput};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

mod ocsort;

pub use ocsort::OcSortTracker;

/// Common interface for multi-object trackers
pub trait MultiObjectTracker: Send {
    /// (Re)configure from a flat parameter map, starting a fresh tracker lifetime
    fn init(&mut self, params: &HashMap<String, String>) -> Result<()>;

    /// Update tracker with the detections of one frame
    ///
    /// # Returns
    /// Tracks confirmed in this frame, with 1-based track ids
    fn update(&mut self, detections: &[Detection]) -> Result<Vec<TrackOutput>>;

    /// Clear all trackers
    fn clear_trackers(&mut self);

    /// Remove specific tracker by its reported ID
    fn remove_tracker(&mut self, track_id: u64);

    /// Get number of active tracklets
    fn num_tracklets(&self) -> usize;

    /// Get current step count
    fn get_step_count(&self) -> u32;
}

impl MultiObjectTracker for OcSortTracker {
    fn init(&mut self, params: &HashMap<String, String>) -> Result<()> {
        self.init(params)
    }

    fn update(&mut self, detections: &[Detection]) -> Result<Vec<TrackOutput>> {
        Ok(self.update(detections))
    }

    fn clear_trackers(&mut self) {
        self.clear_trackers()
    }

    fn remove_tracker(&mut self, track_id: u64) {
        self.remove_tracker(track_id)
    }

    fn num_tracklets(&self) -> usize {
        OcSortTracker::num_tracklets(self)
    }

    fn get_step_count(&self) -> u32 {
        OcSortTracker::get_step_count(self)
    }
}

/// Tracker implementations available by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerKind {
    OcSort,
}

impl TrackerKind {
    pub const ALL: [TrackerKind; 1] = [TrackerKind::OcSort];

    pub fn name(self) -> &'static str {
        match self {
            TrackerKind::OcSort => "OC_SORT",
        }
    }

    /// Build a tracker of this kind configured from `params`
    pub fn create(self, params: &HashMap<String, String>) -> Result<Box<dyn MultiObjectTracker>> {
        match self {
            TrackerKind::OcSort => Ok(Box::new(OcSortTracker::from_params(params)?)),
        }
    }
}

impl FromStr for TrackerKind {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oc_sort" | "ocsort" => Ok(TrackerKind::OcSort),
            _ => Err(TrackerError::UnknownTracker(s.to_string())),
        }
    }
}

impl fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Create a configured tracker by name
pub fn create_tracker(
    name: &str,
    params: &HashMap<String, String>,
) -> Result<Box<dyn MultiObjectTracker>> {
    let kind: TrackerKind = name.parse()?;
    log::info!("Creating {kind} tracker");
    kind.create(params)
}
