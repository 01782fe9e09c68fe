//! Banded dynamic time warping over a source × output distance matrix.
//!
//! Recurrence (cells outside `|i - j| <= window` are unreachable):
//!
//! ```text
//! C(0,0) = D(0,0)
//! C(i,j) = D(i,j) + min( C(i-1,j-1),
//!                        C(i-1,j) + bias,
//!                        C(i,j-1) + bias )
//! ```
//!
//! The path does not have to end in the corner: it ends at the cheapest cell
//! on the last source row or the last output column. The output coordinate of
//! that cell is where the generated sequence is cut.
//!
//! Ties prefer the diagonal move, then a source advance, then an output
//! advance; among end cells the last row is scanned before the last column,
//! each in increasing index order, and the first minimum wins.

use super::AttentionMatrix;
use crate::config::EndpointConfig;
use crate::{Error, Result};

/// Row-major distance matrix, rows are source positions, columns output steps.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl DistanceMatrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::ChannelMismatch {
                what: "distance matrix elements",
                expected: rows * cols,
                actual: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                data.push(f(i, j));
            }
        }
        Self { rows, cols, data }
    }

    /// `1 - a^exponent` for every attention weight `a`.
    ///
    /// The exponent flattens the attention so weak but consistent alignment
    /// still reads as close.
    pub fn from_attention(attention: &AttentionMatrix, exponent: f64) -> Self {
        Self::from_fn(attention.source_len(), attention.steps(), |i, j| {
            let a = f64::from(attention.get(i, j)).max(0.0);
            1.0 - a.powf(exponent)
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }
}

/// Monotonic `(source, output)` path starting at `(0, 0)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentPath {
    points: Vec<(usize, usize)>,
}

impl AlignmentPath {
    /// `(0,0), (1,1), …, (n-1,n-1)`.
    pub fn identity(n: usize) -> Self {
        Self {
            points: (0..n).map(|i| (i, i)).collect(),
        }
    }

    pub fn points(&self) -> &[(usize, usize)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<(usize, usize)> {
        self.points.last().copied()
    }

    /// Output coordinate of the final point, or 0 for an empty path.
    pub fn truncation_index(&self) -> usize {
        self.last().map_or(0, |(_, output)| output)
    }

    /// Every move is `(+1,0)`, `(0,+1)` or `(+1,+1)`.
    pub fn is_monotonic(&self) -> bool {
        self.points.windows(2).all(|w| {
            let (di, dj) = (w[1].0.wrapping_sub(w[0].0), w[1].1.wrapping_sub(w[0].1));
            matches!((di, dj), (1, 0) | (0, 1) | (1, 1))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Start,
    Diagonal,
    Source,
    Output,
}

/// Banded DTW with a slope bias on single-axis moves.
#[derive(Debug, Clone, Copy)]
pub struct DtwAligner {
    window: usize,
    slope_bias: f64,
}

impl DtwAligner {
    pub fn new(window: usize, slope_bias: f64) -> Self {
        Self { window, slope_bias }
    }

    pub fn from_config(config: &EndpointConfig) -> Self {
        Self::new(config.window, config.slope_bias)
    }

    /// Lowest-cost path through `distance`. Empty if either dimension is zero.
    pub fn align(&self, distance: &DistanceMatrix) -> AlignmentPath {
        if distance.is_empty() {
            return AlignmentPath::default();
        }
        let (rows, cols) = (distance.rows(), distance.cols());
        let mut cost = vec![f64::INFINITY; rows * cols];
        let mut moves = vec![Move::Start; rows * cols];

        for i in 0..rows {
            let lo = i.saturating_sub(self.window);
            if lo >= cols {
                continue;
            }
            let hi = i.saturating_add(self.window).min(cols - 1);
            for j in lo..=hi {
                let idx = i * cols + j;
                if i == 0 && j == 0 {
                    cost[idx] = distance.get(0, 0);
                    continue;
                }

                let mut best = f64::INFINITY;
                let mut best_move = Move::Start;
                if i > 0 && j > 0 && cost[idx - cols - 1] < best {
                    best = cost[idx - cols - 1];
                    best_move = Move::Diagonal;
                }
                if i > 0 && cost[idx - cols] + self.slope_bias < best {
                    best = cost[idx - cols] + self.slope_bias;
                    best_move = Move::Source;
                }
                if j > 0 && cost[idx - 1] + self.slope_bias < best {
                    best = cost[idx - 1] + self.slope_bias;
                    best_move = Move::Output;
                }
                if best.is_finite() {
                    cost[idx] = distance.get(i, j) + best;
                    moves[idx] = best_move;
                }
            }
        }

        match end_cell(&cost, rows, cols) {
            Some(end) => backtrack(&moves, cols, end),
            None => AlignmentPath::default(),
        }
    }
}

/// Cheapest reachable cell on the last row, then the last column.
fn end_cell(cost: &[f64], rows: usize, cols: usize) -> Option<(usize, usize)> {
    let last_row = (0..cols).map(|j| (rows - 1, j));
    let last_col = (0..rows - 1).map(|i| (i, cols - 1));

    let mut best: Option<((usize, usize), f64)> = None;
    for (i, j) in last_row.chain(last_col) {
        let c = cost[i * cols + j];
        if c.is_finite() && best.is_none_or(|(_, b)| c < b) {
            best = Some(((i, j), c));
        }
    }
    best.map(|(cell, _)| cell)
}

fn backtrack(moves: &[Move], cols: usize, end: (usize, usize)) -> AlignmentPath {
    let (mut i, mut j) = end;
    let mut points = Vec::with_capacity(i + j + 1);
    loop {
        points.push((i, j));
        match moves[i * cols + j] {
            Move::Start => break,
            Move::Diagonal => {
                i -= 1;
                j -= 1;
            }
            Move::Source => i -= 1,
            Move::Output => j -= 1,
        }
    }
    points.reverse();
    AlignmentPath { points }
}

/// Endpoint detection on a finished attention matrix.
pub fn detect_endpoint(attention: &AttentionMatrix, config: &EndpointConfig) -> AlignmentPath {
    let distance = DistanceMatrix::from_attention(attention, config.attention_exponent);
    DtwAligner::from_config(config).align(&distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn empty_matrix_gives_empty_path() {
        let aligner = DtwAligner::new(100, 0.1);
        for (rows, cols) in [(0, 0), (0, 5), (5, 0)] {
            let d = DistanceMatrix::new(rows, cols, Vec::new()).unwrap();
            let path = aligner.align(&d);
            assert!(path.is_empty());
            assert_eq!(path.truncation_index(), 0);
        }
    }

    #[test]
    fn uniform_distance_prefers_diagonal_and_earliest_end() {
        let d = DistanceMatrix::from_fn(10, 20, |_, _| 0.5);
        let path = DtwAligner::new(100, 0.1).align(&d);
        assert_eq!(path, AlignmentPath::identity(10));
        assert_eq!(path.truncation_index(), 9);
    }

    #[test]
    fn follows_cheap_corridor_then_stops() {
        // Zero cost along a slope-2 path (i, 2i); everything else costs 1
        let d = DistanceMatrix::from_fn(5, 12, |i, j| if j == 2 * i || j == 2 * i + 1 { 0.0 } else { 1.0 });
        let path = DtwAligner::new(100, 0.1).align(&d);
        assert!(path.is_monotonic());
        assert_eq!(path.points()[0], (0, 0));
        // The last source row is reached at output 8; staying on it costs 0 + bias
        assert_eq!(path.last(), Some((4, 8)));
        for &(i, j) in path.points() {
            assert!(j == 2 * i || j == 2 * i + 1, "off corridor at ({i},{j})");
        }
    }

    #[test]
    fn band_limits_reachable_cells() {
        let d = DistanceMatrix::from_fn(3, 10, |_, _| 1.0);
        let path = DtwAligner::new(1, 0.1).align(&d);
        for &(i, j) in path.points() {
            assert!(i.abs_diff(j) <= 1, "({i},{j}) outside band");
        }
        assert_eq!(path.last(), Some((2, 2)));
    }

    #[test]
    fn single_source_row_ends_immediately() {
        let d = DistanceMatrix::from_fn(1, 6, |_, _| 0.3);
        let path = DtwAligner::new(100, 0.1).align(&d);
        assert_eq!(path.points(), &[(0, 0)]);
        assert_eq!(path.truncation_index(), 0);
    }

    #[test]
    fn short_output_ends_on_last_column() {
        // More source positions than output steps: the last column is reached first
        let d = DistanceMatrix::from_fn(8, 3, |_, _| 1.0);
        let path = DtwAligner::new(100, 0.1).align(&d);
        assert_eq!(path.last(), Some((2, 2)));
        assert_eq!(path.truncation_index(), 2);
    }

    #[test]
    fn random_matrices_give_monotonic_paths() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for trial in 0..50 {
            let rows = rng.gen_range(1..30);
            let cols = rng.gen_range(1..60);
            let window = rng.gen_range(1..40);
            let d = DistanceMatrix::from_fn(rows, cols, |_, _| rng.gen_range(0.0..1.0));
            let path = DtwAligner::new(window, 0.1).align(&d);

            assert!(!path.is_empty(), "trial {trial}: empty path");
            assert_eq!(path.points()[0], (0, 0), "trial {trial}");
            assert!(path.is_monotonic(), "trial {trial}: {:?}", path.points());
            let (i, j) = path.last().unwrap();
            assert!(i == rows - 1 || j == cols - 1, "trial {trial}: ended at ({i},{j})");
            for &(i, j) in path.points() {
                assert!(i.abs_diff(j) <= window, "trial {trial}: ({i},{j}) outside band");
            }
        }
    }

    #[test]
    fn attention_to_distance() {
        let attn = AttentionMatrix::from_columns(3, vec![vec![1.0, 0.0, 0.5]]).unwrap();
        let d = DistanceMatrix::from_attention(&attn, 0.3);
        assert_eq!((d.rows(), d.cols()), (3, 1));
        assert!(d.get(0, 0).abs() < 1e-12);
        assert!((d.get(1, 0) - 1.0).abs() < 1e-12);
        assert!((d.get(2, 0) - (1.0 - 0.5f64.powf(0.3))).abs() < 1e-9);
    }

    #[test]
    fn identity_path_properties() {
        let path = AlignmentPath::identity(4);
        assert_eq!(path.points(), &[(0, 0), (1, 1), (2, 2), (3, 3)]);
        assert!(path.is_monotonic());
        assert_eq!(path.truncation_index(), 3);
    }
}
