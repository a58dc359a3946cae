//! Observation-centric multi-object bounding box tracking
//!
//! This crate provides an OC-SORT tracker: per-track Kalman filters with
//! occlusion-aware freeze/unfreeze reprojection, IoU/GIoU association with a
//! direction consistency term, and a Jonker-Volgenant solver for the
//! rectangular assignment problems in between.
//!
//! # Unified Interface
//!
//! Trackers implement the `MultiObjectTracker` trait and can be created by name:
//!
//! ```rust
//! use octrack::{create_tracker, Bbox, Detection};
//! use std::collections::HashMap;
//!
//! let params = HashMap::from([("min_hits".to_string(), "1".to_string())]);
//! let mut tracker = create_tracker("OC_SORT", &params)?;
//!
//! let detections = [Detection::new(Bbox::new(10.0, 10.0, 50.0, 50.0), 0.9, 0, 0)];
//! let tracks = tracker.update(&detections)?;
//! assert_eq!(tracks[0].track_id, 1);
//! # Ok::<(), octrack::TrackerError>(())
//! ```

pub mod association;
pub mod bbox;
pub mod box_tracker;
pub mod config;
pub mod error;
pub mod kalman;
pub mod lapjv; // Jonker-Volgenant algorithm for optimal assignment
pub mod trackers;
pub mod types;

pub use bbox::{giou_batch, iou_batch, Bbox};
pub use box_tracker::KalmanBoxTracker;
pub use config::{AssociationMetric, TrackerConfig};
pub use error::{Result, TrackerError};
pub use lapjv::{AssignmentResult, LapjvSolver};
pub use trackers::{create_tracker, MultiObjectTracker, OcSortTracker, TrackerKind};
pub use types::{Detection, TrackOutput};
