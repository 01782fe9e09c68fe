//! Online estimate of the attended source position for forward attention.
//!
//! At step 0 the estimate jumps to the first local peak of the attention row.
//! From step 1 on, every step's local peak is recorded and the estimate for
//! the next step is extrapolated from a least-squares line through all
//! recorded `(step, peak)` samples:
//!
//! ```text
//! slope    = cov(step, peak) / max(var(step), ε)
//! estimate = round(slope × (step + 1))    // halves to even
//! ```
//!
//! The sample set is seeded with `(0, 0)`: decoding always starts at the
//! beginning of the source.

/// Floor on the step variance in the slope estimate.
const VARIANCE_FLOOR: f64 = 1e-20;

/// Tracks the attended source position across decode steps.
#[derive(Debug, Clone)]
pub struct PeakTracker {
    dropoff: f32,
    estimate: usize,
    steps: Vec<f64>,
    peaks: Vec<f64>,
}

impl PeakTracker {
    /// `dropoff`: a peak scan stops once attention falls below
    /// `running_max / dropoff`.
    pub fn new(dropoff: f32) -> Self {
        Self::with_capacity(dropoff, 0)
    }

    pub fn with_capacity(dropoff: f32, steps: usize) -> Self {
        let mut tracker = Self {
            dropoff,
            estimate: 0,
            steps: Vec::with_capacity(steps + 1),
            peaks: Vec::with_capacity(steps + 1),
        };
        tracker.steps.push(0.0);
        tracker.peaks.push(0.0);
        tracker
    }

    /// Current estimate of the attended source position.
    pub fn estimate(&self) -> usize {
        self.estimate
    }

    /// Recorded `(step, peak)` samples, including the `(0, 0)` seed.
    pub fn track(&self) -> impl Iterator<Item = (usize, usize)> {
        self.steps
            .iter()
            .zip(&self.peaks)
            .map(|(&s, &p)| (s as usize, p as usize))
    }

    /// Fold in the attention row of `step` and return the new estimate.
    pub fn update(&mut self, row: &[f32], step: usize) -> usize {
        let found = local_peak(row, self.estimate, self.dropoff);
        if step == 0 {
            if found > self.estimate {
                self.estimate = found;
            }
        } else {
            self.steps.push(step as f64);
            self.peaks.push(found as f64);
            let slope = regression_slope(&self.steps, &self.peaks);
            self.estimate = project_peak(slope, step + 1);
        }
        tracing::trace!(step, found, estimate = self.estimate, "forward attention peak");
        self.estimate
    }
}

/// First local maximum of `row` at or after `start`.
///
/// Scans forward keeping the running maximum and stops as soon as a value
/// drops below `running_max / dropoff`. A `start` past the end is clamped
/// onto the last position.
pub fn local_peak(row: &[f32], start: usize, dropoff: f32) -> usize {
    if row.is_empty() {
        return 0;
    }
    let start = start.min(row.len() - 1);
    let mut best = start;
    for (i, &value) in row.iter().enumerate().skip(start + 1) {
        if value > row[best] {
            best = i;
        } else if value * dropoff < row[best] {
            break;
        }
    }
    best
}

/// Least-squares slope of `ys` against `xs`.
pub fn regression_slope(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return 0.0;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var = 0.0;
    for (&x, &y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var += (x - mean_x) * (x - mean_x);
    }
    let cov = cov / n as f64;
    let var = var / n as f64;
    cov / var.max(VARIANCE_FLOOR)
}

/// `round(slope × step)` with halves to even, clamped at zero.
pub fn project_peak(slope: f64, step: usize) -> usize {
    let projected = (slope * step as f64).round_ties_even();
    if projected.is_finite() && projected > 0.0 {
        projected as usize
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Row of `len` with a single dominant peak at `at`.
    fn peaked(len: usize, at: usize) -> Vec<f32> {
        let mut row = vec![0.01; len];
        row[at] = 0.9;
        row
    }

    #[test]
    fn regression_on_unit_slope_points() {
        let steps = [0.0, 1.0, 2.0, 3.0];
        let peaks = [5.0, 6.0, 7.0, 8.0];
        let slope = regression_slope(&steps, &peaks);
        // cov = 1.25, var = 1.25
        assert!((slope - 1.0).abs() < 1e-12, "slope = {slope}");
        assert_eq!(project_peak(slope, 4), 4);
    }

    #[test]
    fn regression_with_constant_steps_is_floored() {
        let slope = regression_slope(&[2.0, 2.0], &[3.0, 9.0]);
        assert_eq!(slope, 0.0);
        assert_eq!(regression_slope(&[], &[]), 0.0);
    }

    #[test]
    fn projection_clamps_negative() {
        assert_eq!(project_peak(-1.5, 3), 0);
        assert_eq!(project_peak(f64::NAN, 3), 0);
        assert_eq!(project_peak(2.5, 3), 8);
    }

    #[test]
    fn projection_rounds_halves_to_even() {
        assert_eq!(project_peak(0.5, 5), 2);
        assert_eq!(project_peak(0.5, 1), 0);
        assert_eq!(project_peak(0.5, 3), 2);
        assert_eq!(project_peak(1.5, 3), 4);
    }

    #[test]
    fn local_peak_stops_at_first_dominant_maximum() {
        let mut row = vec![0.01f32; 16];
        row[4] = 0.5;
        row[10] = 0.9;
        // Scan from 0 finds the first bump even though a larger one follows
        assert_eq!(local_peak(&row, 0, 5.0), 4);
        // Starting past it finds the second
        assert_eq!(local_peak(&row, 6, 5.0), 10);
        // Start beyond the row is clamped
        assert_eq!(local_peak(&row, 40, 5.0), 15);
        assert_eq!(local_peak(&[], 3, 5.0), 0);
    }

    #[test]
    fn local_peak_climbs_a_gentle_slope() {
        // Decreases by less than the dropoff ratio never stop the scan early
        let row = [0.1f32, 0.2, 0.15, 0.3, 0.25, 0.01];
        assert_eq!(local_peak(&row, 0, 5.0), 3);
    }

    #[test]
    fn tracker_follows_unit_slope() {
        let mut tracker = PeakTracker::new(5.0);
        let estimates: Vec<usize> = (0..4)
            .map(|t| tracker.update(&peaked(32, t), t))
            .collect();
        // step 0: peak 0; step 1: samples (0,0),(1,1) → slope 1 → 2; …
        assert_eq!(estimates, vec![0, 2, 3, 4]);
        let track: Vec<_> = tracker.track().collect();
        assert_eq!(track, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn tracker_follows_slope_two() {
        let mut tracker = PeakTracker::new(5.0);
        let estimates: Vec<usize> = (0..4)
            .map(|t| tracker.update(&peaked(32, 2 * t), t))
            .collect();
        assert_eq!(estimates, vec![0, 4, 6, 8]);
    }

    #[test]
    fn step_zero_only_moves_forward() {
        let mut tracker = PeakTracker::new(5.0);
        assert_eq!(tracker.update(&peaked(16, 5), 0), 5);
        assert_eq!(tracker.track().count(), 1);
    }

    #[test]
    fn projection_matches_formula_on_recorded_track() {
        let mut tracker = PeakTracker::new(5.0);
        tracker.update(&peaked(64, 5), 0);
        let estimate = tracker.update(&peaked(64, 6), 1);

        let (xs, ys): (Vec<f64>, Vec<f64>) =
            tracker.track().map(|(s, p)| (s as f64, p as f64)).unzip();
        let expected = project_peak(regression_slope(&xs, &ys), 2);
        assert_eq!(estimate, expected);
        // (0,0),(1,6): slope 6 → 12
        assert_eq!(estimate, 12);
    }
}
