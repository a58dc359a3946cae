//! Bounding box representation and pairwise box similarity metrics

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned bounding box in corner format
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox<T = f32> {
    pub xmin: T,
    pub ymin: T,
    pub xmax: T,
    pub ymax: T,
}

impl Bbox<f32> {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn from_bounds(bounds: [f32; 4]) -> Self {
        Self::new(bounds[0], bounds[1], bounds[2], bounds[3])
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center_x(&self) -> f32 {
        (self.xmin + self.xmax) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.ymin + self.ymax) / 2.0
    }

    /// True when every coordinate is a finite number
    pub fn is_finite(&self) -> bool {
        self.to_bounds().iter().all(|v| v.is_finite())
    }

    /// Zero or negative extent along either axis
    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    /// Convert to bounds array [xmin, ymin, xmax, ymax]
    pub fn to_bounds(&self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    /// Convert to measurement space [center_x, center_y, scale, aspect_ratio]
    /// where scale is the box area and aspect_ratio is width / height.
    pub fn to_z(&self) -> [f32; 4] {
        let w = self.width();
        let h = self.height();
        [self.center_x(), self.center_y(), w * h, w / (h + 1e-6)]
    }

    /// Create from measurement space [center_x, center_y, scale, aspect_ratio].
    ///
    /// Non-positive scale or ratio yields NaN coordinates, which callers
    /// detect through [`Bbox::is_finite`].
    pub fn from_z(z: &[f32; 4]) -> Self {
        let (w, h) = scale_ratio_to_wh(z[2], z[3]);

        Self {
            xmin: z[0] - w / 2.0,
            ymin: z[1] - h / 2.0,
            xmax: z[0] + w / 2.0,
            ymax: z[1] + h / 2.0,
        }
    }
}

/// Width and height from (scale, aspect_ratio): w = sqrt(s*r), h = sqrt(s/r)
pub fn scale_ratio_to_wh(scale: f32, ratio: f32) -> (f32, f32) {
    ((scale * ratio).sqrt(), (scale / ratio).sqrt())
}

impl<T: fmt::Display> fmt::Display for Bbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bbox({}, {}, {}, {})",
            self.xmin, self.ymin, self.xmax, self.ymax
        )
    }
}

/// Unit direction of motion between two box centers
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}

impl Velocity {
    /// Cosine of the angle between two directions, clamped to [-1, 1]
    pub fn cosine(&self, other: &Velocity) -> f32 {
        (self.dx * other.dx + self.dy * other.dy).clamp(-1.0, 1.0)
    }
}

/// Normalized direction from the center of `from` to the center of `to`
pub fn speed_direction(from: &Bbox<f32>, to: &Bbox<f32>) -> Velocity {
    let dx = to.center_x() - from.center_x();
    let dy = to.center_y() - from.center_y();
    let norm = (dx * dx + dy * dy).sqrt() + 1e-6;
    Velocity {
        dx: dx / norm,
        dy: dy / norm,
    }
}

/// Intersection area and union area of two boxes
fn overlap(bbox1: &Bbox<f32>, bbox2: &Bbox<f32>) -> (f32, f32) {
    let w = (bbox1.xmax.min(bbox2.xmax) - bbox1.xmin.max(bbox2.xmin)).max(0.0);
    let h = (bbox1.ymax.min(bbox2.ymax) - bbox1.ymin.max(bbox2.ymin)).max(0.0);
    let intersection = w * h;
    (intersection, bbox1.area() + bbox2.area() - intersection)
}

/// Calculate IoU between two bounding boxes; 0 when either box is degenerate
pub fn calculate_iou(bbox1: &Bbox<f32>, bbox2: &Bbox<f32>) -> f32 {
    if bbox1.is_degenerate() || bbox2.is_degenerate() {
        return 0.0;
    }

    let (intersection, union) = overlap(bbox1, bbox2);
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Calculate generalized IoU: IoU minus the share of the enclosing box
/// not covered by the union. Lies in (-1, 1]; negative for disjoint boxes.
pub fn calculate_giou(bbox1: &Bbox<f32>, bbox2: &Bbox<f32>) -> f32 {
    let (intersection, union) = overlap(bbox1, bbox2);
    let iou = if bbox1.is_degenerate() || bbox2.is_degenerate() || union <= 0.0 {
        0.0
    } else {
        intersection / union
    };

    let enclose_w = bbox1.xmax.max(bbox2.xmax) - bbox1.xmin.min(bbox2.xmin);
    let enclose_h = bbox1.ymax.max(bbox2.ymax) - bbox1.ymin.min(bbox2.ymin);
    let enclose = enclose_w * enclose_h;

    if enclose > 0.0 {
        iou - (enclose - union.max(0.0)) / enclose
    } else {
        iou
    }
}

/// Apply a pairwise metric to every (a, b) pair, one row per box in `boxes_a`
fn pairwise<F>(boxes_a: &[Bbox<f32>], boxes_b: &[Bbox<f32>], metric: F) -> Array2<f32>
where
    F: Fn(&Bbox<f32>, &Bbox<f32>) -> f32 + Sync,
{
    let n_a = boxes_a.len();
    let n_b = boxes_b.len();

    if n_a == 0 || n_b == 0 {
        return Array2::zeros((n_a, n_b));
    }

    // Rows are computed in parallel, collect keeps them in input order
    let rows: Vec<Vec<f32>> = boxes_a
        .par_iter()
        .map(|a| boxes_b.iter().map(|b| metric(a, b)).collect())
        .collect();

    Array2::from_shape_fn((n_a, n_b), |(i, j)| rows[i][j])
}

/// IoU matrix of shape (|boxes_a|, |boxes_b|)
pub fn iou_batch(boxes_a: &[Bbox<f32>], boxes_b: &[Bbox<f32>]) -> Array2<f32> {
    pairwise(boxes_a, boxes_b, calculate_iou)
}

/// GIoU matrix of shape (|boxes_a|, |boxes_b|)
pub fn giou_batch(boxes_a: &[Bbox<f32>], boxes_b: &[Bbox<f32>]) -> Array2<f32> {
    pairwise(boxes_a, boxes_b, calculate_giou)
}
