//! Jonker-Volgenant solver for the rectangular linear assignment problem
//!
//! Rows are conventionally detections and columns tracks. Rectangular cost
//! matrices are extended to square by padding the smaller dimension with a
//! cost strictly worse than every real entry, solved densely, and padded
//! matches are dropped from the result.
//!
//! The dense solver follows the classic three phases: column reduction with
//! reduction transfer, two rounds of augmenting row reduction, then a
//! Dijkstra-style shortest augmenting path search for each remaining free
//! row. Dual column potentials live in `v`.
use crate::error::{Result, TrackerError};
use ndarray::{s, Array2, ArrayView2};

/// Result of a linear assignment
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentResult {
    /// Assignments as (row, column) pairs, i.e. (detection_idx, track_idx), sorted by row
    pub assignments: Vec<(usize, usize)>,
    /// Rows left without a real column, ascending
    pub unassigned_detections: Vec<usize>,
    /// Columns left without a real row, ascending
    pub unassigned_tracks: Vec<usize>,
    /// Sum of the costs of `assignments`
    pub total_cost: f64,
}

impl AssignmentResult {
    /// Result with nothing assigned
    pub fn unmatched(num_rows: usize, num_cols: usize) -> Self {
        Self {
            assignments: Vec::new(),
            unassigned_detections: (0..num_rows).collect(),
            unassigned_tracks: (0..num_cols).collect(),
            total_cost: 0.0,
        }
    }

    /// Build a result from accepted pairs, deriving the unassigned sides
    pub fn from_pairs(
        mut pairs: Vec<(usize, usize)>,
        num_rows: usize,
        num_cols: usize,
        total_cost: f64,
    ) -> Self {
        pairs.sort_unstable();

        let mut row_used = vec![false; num_rows];
        let mut col_used = vec![false; num_cols];
        for &(r, c) in &pairs {
            row_used[r] = true;
            col_used[c] = true;
        }

        Self {
            assignments: pairs,
            unassigned_detections: (0..num_rows).filter(|&r| !row_used[r]).collect(),
            unassigned_tracks: (0..num_cols).filter(|&c| !col_used[c]).collect(),
            total_cost,
        }
    }
}

/// Jonker-Volgenant assignment solver
pub struct LapjvSolver;

impl LapjvSolver {
    /// Minimum-cost one-to-one assignment of a (possibly rectangular) cost matrix.
    ///
    /// Padding uses `max_cost + 1`.
    pub fn solve(cost_matrix: ArrayView2<f64>) -> Result<AssignmentResult> {
        Self::solve_with_limit(cost_matrix, None)
    }

    /// Like [`LapjvSolver::solve`], but padded entries cost `cost_limit / 2`
    /// when a positive finite limit is given.
    ///
    /// # Errors
    /// `TrackerError::Assignment` when the matrix holds NaN or infinite
    /// entries, or when the solver's internal bookkeeping breaks down.
    pub fn solve_with_limit(
        cost_matrix: ArrayView2<f64>,
        cost_limit: Option<f64>,
    ) -> Result<AssignmentResult> {
        let (num_rows, num_cols) = cost_matrix.dim();

        if num_rows == 0 || num_cols == 0 {
            return Ok(AssignmentResult::unmatched(num_rows, num_cols));
        }

        if cost_matrix.iter().any(|c| !c.is_finite()) {
            return Err(TrackerError::assignment("cost matrix contains non-finite entries"));
        }

        let square = extend_cost(cost_matrix, cost_limit);
        let row_solution = DenseLapjv::new(square.view()).solve()?;

        let pairs: Vec<(usize, usize)> = row_solution
            .into_iter()
            .take(num_rows)
            .enumerate()
            .filter(|&(_, col)| col < num_cols)
            .collect();
        let total_cost = pairs.iter().map(|&(r, c)| cost_matrix[[r, c]]).sum();

        Ok(AssignmentResult::from_pairs(pairs, num_rows, num_cols, total_cost))
    }
}

/// Pad a rectangular matrix to square with a cost worse than any real entry
fn extend_cost(cost_matrix: ArrayView2<f64>, cost_limit: Option<f64>) -> Array2<f64> {
    let (num_rows, num_cols) = cost_matrix.dim();
    let limit = cost_limit.filter(|l| l.is_finite() && *l > 0.0);

    if num_rows == num_cols && limit.is_none() {
        return cost_matrix.to_owned();
    }

    let pad = match limit {
        Some(l) => l / 2.0,
        None => cost_matrix.iter().copied().fold(f64::NEG_INFINITY, f64::max) + 1.0,
    };

    let n = num_rows.max(num_cols);
    let mut extended = Array2::from_elem((n, n), pad);
    extended.slice_mut(s![..num_rows, ..num_cols]).assign(&cost_matrix);
    extended
}

/// Working state of the dense solver on an n x n matrix
struct DenseLapjv<'a> {
    n: usize,
    cost: ArrayView2<'a, f64>,
    /// column assigned to each row
    x: Vec<Option<usize>>,
    /// row assigned to each column
    y: Vec<Option<usize>>,
    /// dual column potentials
    v: Vec<f64>,
}

impl<'a> DenseLapjv<'a> {
    fn new(cost: ArrayView2<'a, f64>) -> Self {
        let n = cost.nrows();
        Self {
            n,
            cost,
            x: vec![None; n],
            y: vec![None; n],
            v: vec![f64::INFINITY; n],
        }
    }

    /// Returns the column assigned to every row
    fn solve(mut self) -> Result<Vec<usize>> {
        let mut free_rows = self.column_reduction_transfer();

        let mut rounds = 0;
        while !free_rows.is_empty() && rounds < 2 {
            free_rows = self.augmenting_row_reduction(free_rows);
            rounds += 1;
        }

        if !free_rows.is_empty() {
            self.augment(&free_rows)?;
        }

        self.x
            .iter()
            .enumerate()
            .map(|(i, j)| {
                j.ok_or_else(|| TrackerError::assignment(format!("row {i} left unassigned")))
            })
            .collect()
    }

    #[inline]
    fn reduced(&self, i: usize, j: usize) -> f64 {
        self.cost[[i, j]] - self.v[j]
    }

    /// Column reduction and reduction transfer; returns the rows left free
    fn column_reduction_transfer(&mut self) -> Vec<usize> {
        let n = self.n;
        let mut argmin = vec![0usize; n];

        for i in 0..n {
            for j in 0..n {
                let c = self.cost[[i, j]];
                if c < self.v[j] {
                    self.v[j] = c;
                    argmin[j] = i;
                }
            }
        }

        // Each row keeps at most one of the columns it minimises
        let mut unique = vec![true; n];
        for j in (0..n).rev() {
            let i = argmin[j];
            if self.x[i].is_none() {
                self.x[i] = Some(j);
                self.y[j] = Some(i);
            } else {
                unique[i] = false;
                self.y[j] = None;
            }
        }

        let mut free_rows = Vec::with_capacity(n);
        for i in 0..n {
            match self.x[i] {
                None => free_rows.push(i),
                Some(j) if unique[i] && n > 1 => {
                    let second = (0..n)
                        .filter(|&j2| j2 != j)
                        .map(|j2| self.reduced(i, j2))
                        .fold(f64::INFINITY, f64::min);
                    self.v[j] -= second;
                }
                Some(_) => {}
            }
        }
        free_rows
    }

    /// One round of augmenting row reduction over `free_rows`
    fn augmenting_row_reduction(&mut self, mut free_rows: Vec<usize>) -> Vec<usize> {
        let n = self.n;
        let num_free = free_rows.len();
        let mut current = 0;
        let mut new_free = 0;
        let mut rr_cnt = 0;

        while current < num_free {
            rr_cnt += 1;
            let free_i = free_rows[current];
            current += 1;

            // Two smallest reduced costs in the row
            let mut j1 = 0;
            let mut v1 = self.reduced(free_i, 0);
            let mut j2 = None;
            let mut v2 = f64::INFINITY;
            for j in 1..n {
                let c = self.reduced(free_i, j);
                if c < v2 {
                    if c >= v1 {
                        v2 = c;
                        j2 = Some(j);
                    } else {
                        v2 = v1;
                        v1 = c;
                        j2 = Some(j1);
                        j1 = j;
                    }
                }
            }

            let mut i0 = self.y[j1];
            let v1_new = self.v[j1] - (v2 - v1);
            let v1_lowers = v1_new < self.v[j1];

            if rr_cnt < current * n {
                if v1_lowers {
                    self.v[j1] = v1_new;
                } else if let (Some(_), Some(alt)) = (i0, j2) {
                    j1 = alt;
                    i0 = self.y[alt];
                }

                if let Some(row) = i0 {
                    if v1_lowers {
                        current -= 1;
                        free_rows[current] = row;
                    } else {
                        free_rows[new_free] = row;
                        new_free += 1;
                    }
                }
            } else if let Some(row) = i0 {
                free_rows[new_free] = row;
                new_free += 1;
            }

            self.x[free_i] = Some(j1);
            self.y[j1] = Some(free_i);
        }

        free_rows.truncate(new_free);
        free_rows
    }

    /// Augment every remaining free row along a shortest path
    fn augment(&mut self, free_rows: &[usize]) -> Result<()> {
        let mut pred = vec![0usize; self.n];

        for &free_i in free_rows {
            let mut j = self.find_path(free_i, &mut pred)?;

            let mut steps = 0;
            loop {
                let i = pred[j];
                self.y[j] = Some(i);
                let previous = self.x[i].replace(j);
                if i == free_i {
                    break;
                }

                steps += 1;
                if steps > self.n {
                    return Err(TrackerError::assignment("augmenting path longer than matrix size"));
                }
                j = previous.ok_or_else(|| {
                    TrackerError::assignment(format!("row {i} on augmenting path has no column"))
                })?;
            }
        }
        Ok(())
    }

    /// Dijkstra search from `start` to the nearest free column; updates the
    /// potentials of the columns settled before the final phase.
    fn find_path(&mut self, start: usize, pred: &mut [usize]) -> Result<usize> {
        let n = self.n;
        let mut cols: Vec<usize> = (0..n).collect();
        let mut d: Vec<f64> = (0..n).map(|j| self.reduced(start, j)).collect();
        pred.fill(start);

        let mut lo = 0;
        let mut hi = 0;
        let mut n_ready = 0;
        let mut mind = f64::INFINITY;

        let final_j = loop {
            if lo == hi {
                if lo >= n {
                    return Err(TrackerError::assignment(format!(
                        "no free column reachable from row {start}"
                    )));
                }
                n_ready = lo;
                hi = find_dense(lo, &d, &mut cols);
                mind = d[cols[lo]];
                if let Some(&j) = cols[lo..hi].iter().find(|&&j| self.y[j].is_none()) {
                    break j;
                }
            }

            if let Some(j) = self.scan_dense(mind, &mut lo, &mut hi, &mut d, &mut cols, pred)? {
                break j;
            }
        };

        for &j in &cols[..n_ready] {
            self.v[j] += d[j] - mind;
        }
        Ok(final_j)
    }

    /// Scan the columns in `cols[lo..hi]` (all at distance `mind`), relaxing
    /// the rest; returns a free column reached at distance `mind`.
    fn scan_dense(
        &self,
        mind: f64,
        lo: &mut usize,
        hi: &mut usize,
        d: &mut [f64],
        cols: &mut [usize],
        pred: &mut [usize],
    ) -> Result<Option<usize>> {
        while *lo != *hi {
            let j = cols[*lo];
            *lo += 1;

            let i = self.y[j].ok_or_else(|| {
                TrackerError::assignment(format!("scanned column {j} has no assigned row"))
            })?;
            let h = self.reduced(i, j) - d[j];

            for k in *hi..self.n {
                let j = cols[k];
                let cred = self.reduced(i, j) - h;
                if cred < d[j] {
                    d[j] = cred;
                    pred[j] = i;
                    if cred == mind {
                        if self.y[j].is_none() {
                            return Ok(Some(j));
                        }
                        cols[k] = cols[*hi];
                        cols[*hi] = j;
                        *hi += 1;
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Move every column with the minimal distance among `cols[lo..]` to the
/// front of that range; returns the end of the minimal band.
fn find_dense(lo: usize, d: &[f64], cols: &mut [usize]) -> usize {
    let mut hi = lo + 1;
    let mut mind = d[cols[lo]];

    for k in hi..cols.len() {
        let j = cols[k];
        if d[j] <= mind {
            if d[j] < mind {
                hi = lo;
                mind = d[j];
            }
            cols[k] = cols[hi];
            cols[hi] = j;
            hi += 1;
        }
    }
    hi
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use pathfinding::prelude::{kuhn_munkres, Matrix};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Minimum cost over all assignments that match every row or every
    /// column, whichever side is smaller
    fn brute_force_min(cost: &Array2<f64>) -> f64 {
        fn recurse(cost: &Array2<f64>, transpose: bool, k: usize, used: &mut Vec<bool>) -> f64 {
            let (outer, inner) = if transpose {
                (cost.ncols(), cost.nrows())
            } else {
                (cost.nrows(), cost.ncols())
            };
            if k == outer {
                return 0.0;
            }
            let mut best = f64::INFINITY;
            for m in 0..inner {
                if used[m] {
                    continue;
                }
                used[m] = true;
                let c = if transpose { cost[[m, k]] } else { cost[[k, m]] };
                best = best.min(c + recurse(cost, transpose, k + 1, used));
                used[m] = false;
            }
            best
        }

        let transpose = cost.nrows() > cost.ncols();
        let inner = cost.nrows().max(cost.ncols());
        recurse(cost, transpose, 0, &mut vec![false; inner])
    }

    fn assert_one_to_one(result: &AssignmentResult, rows: usize, cols: usize) {
        let mut seen_rows = vec![false; rows];
        let mut seen_cols = vec![false; cols];
        for &(r, c) in &result.assignments {
            assert!(!seen_rows[r] && !seen_cols[c]);
            seen_rows[r] = true;
            seen_cols[c] = true;
        }
        assert_eq!(result.assignments.len(), rows.min(cols));
        assert_eq!(result.unassigned_detections.len() + result.assignments.len(), rows);
        assert_eq!(result.unassigned_tracks.len() + result.assignments.len(), cols);
    }

    #[test]
    fn test_empty_matrix() {
        let cost = Array2::<f64>::zeros((0, 3));
        let result = LapjvSolver::solve(cost.view()).unwrap();
        assert!(result.assignments.is_empty());
        assert_eq!(result.unassigned_tracks, vec![0, 1, 2]);

        let cost = Array2::<f64>::zeros((2, 0));
        let result = LapjvSolver::solve(cost.view()).unwrap();
        assert_eq!(result.unassigned_detections, vec![0, 1]);
    }

    #[test]
    fn test_single_element() {
        let cost = array![[0.7]];
        let result = LapjvSolver::solve(cost.view()).unwrap();
        assert_eq!(result.assignments, vec![(0, 0)]);
        assert_abs_diff_eq!(result.total_cost, 0.7);
    }

    #[test]
    fn test_square_known_optimum() {
        let cost = array![[4.0, 1.0, 3.0], [2.0, 0.0, 5.0], [3.0, 2.0, 2.0]];
        let result = LapjvSolver::solve(cost.view()).unwrap();
        assert_eq!(result.assignments, vec![(0, 1), (1, 0), (2, 2)]);
        assert_abs_diff_eq!(result.total_cost, 5.0);
    }

    #[test]
    fn test_rectangular_more_columns() {
        let cost = array![[-0.9, -0.1, -0.3], [-0.8, -0.7, -0.0]];
        let result = LapjvSolver::solve(cost.view()).unwrap();
        assert_eq!(result.assignments, vec![(0, 0), (1, 1)]);
        assert_eq!(result.unassigned_tracks, vec![2]);
        assert!(result.unassigned_detections.is_empty());
    }

    #[test]
    fn test_rectangular_more_rows() {
        let cost = array![[5.0, 9.0], [1.0, 8.0], [6.0, 2.0]];
        let result = LapjvSolver::solve(cost.view()).unwrap();
        assert_eq!(result.assignments, vec![(1, 0), (2, 1)]);
        assert_eq!(result.unassigned_detections, vec![0]);
    }

    #[test]
    fn test_cost_limit_padding_keeps_optimum() {
        let cost = array![[0.2, 0.9, 0.4], [0.3, 0.1, 0.8]];
        let plain = LapjvSolver::solve(cost.view()).unwrap();
        let limited = LapjvSolver::solve_with_limit(cost.view(), Some(0.5)).unwrap();
        assert_eq!(plain.assignments, limited.assignments);
        assert_abs_diff_eq!(plain.total_cost, 0.3);
    }

    #[test]
    fn test_non_finite_rejected() {
        let cost = array![[0.0, f64::NAN], [1.0, 2.0]];
        assert!(matches!(
            LapjvSolver::solve(cost.view()),
            Err(TrackerError::Assignment(_))
        ));

        let cost = array![[f64::INFINITY, 1.0]];
        assert!(LapjvSolver::solve(cost.view()).is_err());
    }

    #[test]
    fn test_ties_are_deterministic() {
        let cost = Array2::from_elem((4, 4), 1.0);
        let first = LapjvSolver::solve(cost.view()).unwrap();
        let second = LapjvSolver::solve(cost.view()).unwrap();
        assert_eq!(first, second);
        assert_one_to_one(&first, 4, 4);
        assert_abs_diff_eq!(first.total_cost, 4.0);
    }

    #[test]
    fn test_optimal_against_brute_force() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..300 {
            let rows = rng.gen_range(1..=6);
            let cols = rng.gen_range(1..=6);
            let cost = Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0..1.0));

            let result = LapjvSolver::solve(cost.view()).unwrap();
            assert_one_to_one(&result, rows, cols);
            assert!(
                result.total_cost <= brute_force_min(&cost) + 1e-9,
                "suboptimal on {cost:?}"
            );
        }
    }

    #[test]
    fn test_optimal_with_integer_ties() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..300 {
            let rows = rng.gen_range(1..=6);
            let cols = rng.gen_range(1..=6);
            let cost = Array2::from_shape_fn((rows, cols), |_| rng.gen_range(0..4) as f64);

            let result = LapjvSolver::solve(cost.view()).unwrap();
            assert_one_to_one(&result, rows, cols);
            assert_abs_diff_eq!(result.total_cost, brute_force_min(&cost), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_agrees_with_kuhn_munkres() {
        let mut rng = StdRng::seed_from_u64(2024);
        for _ in 0..20 {
            let rows = rng.gen_range(5..30);
            let cols = rng.gen_range(rows..40);
            let cost = Array2::from_shape_fn((rows, cols), |_| rng.gen_range(0..1000) as f64);

            // kuhn_munkres maximises, so feed it negated weights
            let mut weights = Matrix::new(rows, cols, 0i64);
            for ((r, c), value) in cost.indexed_iter() {
                weights[(r, c)] = -(*value as i64);
            }
            let (best, _) = kuhn_munkres(&weights);

            let result = LapjvSolver::solve(cost.view()).unwrap();
            assert_one_to_one(&result, rows, cols);
            assert_eq!(result.total_cost as i64, -best);
        }
    }
}
