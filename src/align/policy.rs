//! Per-step alignment policies.
//!
//! A policy is picked once per request from [`AttentionMode`] and the decode
//! loop is monomorphized over it, so the per-step path has no mode checks.
//!
//! | Policy | Attention | Budget | Endpoint |
//! |---|---|---|---|
//! | [`RawAttention`] | full softmax over the context | `round(2N)` | DTW |
//! | [`DiagonalAlignment`] | none, step `t` reads position `t` | `N` | `N` |
//! | [`ForwardAttention`] | softmax masked around a tracked peak | `round(2N)` | DTW |

use candle_core::Tensor;

use super::AttentionMatrix;
use super::dtw::{AlignmentPath, detect_endpoint};
use super::tracker::PeakTracker;
use crate::config::{AttentionMode, EndpointConfig, ForwardWindowConfig};
use crate::model::Context;
use crate::model::attention::{scaled_dot_product, weighted_values, weights_row};
use crate::{Error, Result};

/// What one policy step hands back to the decoder.
#[derive(Debug, Clone)]
pub struct AlignerStep {
    /// Vector concatenated with the query for the frame regenerator, `[d_v, 1]`.
    pub attended: Tensor,
    /// Attention row over the source, length `N`.
    pub row: Vec<f32>,
}

/// An alignment policy for one decode run.
pub trait Aligner {
    fn mode(&self) -> AttentionMode;

    /// Produce the attended vector and attention row for `step`.
    fn attend(&mut self, step: usize, query: &Tensor, context: &Context) -> Result<AlignerStep>;

    /// Alignment path and truncation index once all steps are done.
    fn finish(
        &self,
        attention: &AttentionMatrix,
        endpoint: &EndpointConfig,
    ) -> (AlignmentPath, usize);
}

fn single_column(query: &Tensor) -> Result<()> {
    let columns = query.dim(1)?;
    if columns != 1 {
        return Err(Error::ChannelMismatch {
            what: "query columns per step",
            expected: 1,
            actual: columns,
        });
    }
    Ok(())
}

fn dtw_endpoint(attention: &AttentionMatrix, endpoint: &EndpointConfig) -> (AlignmentPath, usize) {
    let path = detect_endpoint(attention, endpoint);
    let truncation = path.truncation_index();
    (path, truncation)
}

/// Unconstrained attention over the whole context.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawAttention;

impl Aligner for RawAttention {
    fn mode(&self) -> AttentionMode {
        AttentionMode::Raw
    }

    fn attend(&mut self, _step: usize, query: &Tensor, context: &Context) -> Result<AlignerStep> {
        single_column(query)?;
        let out = scaled_dot_product(query, context)?;
        Ok(AlignerStep {
            attended: out.vector,
            row: weights_row(&out.weights)?,
        })
    }

    fn finish(
        &self,
        attention: &AttentionMatrix,
        endpoint: &EndpointConfig,
    ) -> (AlignmentPath, usize) {
        dtw_endpoint(attention, endpoint)
    }
}

/// Identity alignment: step `t` uses value column `t` directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagonalAlignment;

impl Aligner for DiagonalAlignment {
    fn mode(&self) -> AttentionMode {
        AttentionMode::Diagonal
    }

    fn attend(&mut self, step: usize, _query: &Tensor, context: &Context) -> Result<AlignerStep> {
        if step >= context.source_len() {
            return Err(Error::ChannelMismatch {
                what: "diagonal step within source length",
                expected: context.source_len(),
                actual: step + 1,
            });
        }
        let mut row = vec![0f32; context.source_len()];
        row[step] = 1.0;
        Ok(AlignerStep {
            attended: context.value_at(step)?,
            row,
        })
    }

    fn finish(
        &self,
        attention: &AttentionMatrix,
        _endpoint: &EndpointConfig,
    ) -> (AlignmentPath, usize) {
        let n = attention.source_len();
        (AlignmentPath::identity(n), n)
    }
}

/// Attention restricted to a window around the tracked peak.
#[derive(Debug, Clone)]
pub struct ForwardAttention {
    tracker: PeakTracker,
    window: ForwardWindowConfig,
    reduction_factor: usize,
}

impl ForwardAttention {
    pub fn new(window: ForwardWindowConfig, reduction_factor: usize) -> Self {
        Self {
            tracker: PeakTracker::new(window.peak_dropoff),
            window,
            reduction_factor,
        }
    }

    pub fn tracker(&self) -> &PeakTracker {
        &self.tracker
    }
}

impl Aligner for ForwardAttention {
    fn mode(&self) -> AttentionMode {
        AttentionMode::Forward
    }

    fn attend(&mut self, step: usize, query: &Tensor, context: &Context) -> Result<AlignerStep> {
        single_column(query)?;
        let out = scaled_dot_product(query, context)?;
        let mut row = weights_row(&out.weights)?;

        let peak = self.tracker.update(&row, step);
        let (lo, hi) = self.window.window(peak, self.reduction_factor, row.len());
        mask_to_window(&mut row, lo, hi, self.window.epsilon);

        let attended = weighted_values(&row, context)?;
        Ok(AlignerStep { attended, row })
    }

    fn finish(
        &self,
        attention: &AttentionMatrix,
        endpoint: &EndpointConfig,
    ) -> (AlignmentPath, usize) {
        dtw_endpoint(attention, endpoint)
    }
}

/// Zero `row` outside `[lo, hi)`, floor it at `epsilon` inside and
/// renormalize to sum to one.
///
/// An empty window zeroes the whole row, so the floor leaves it uniform.
pub fn mask_to_window(row: &mut [f32], lo: usize, hi: usize, epsilon: f32) {
    if row.is_empty() {
        return;
    }
    let hi = hi.min(row.len());
    let lo = lo.min(hi);
    let (lo, hi) = if lo < hi {
        (lo, hi)
    } else {
        tracing::debug!(lo, hi, len = row.len(), "forward attention window is empty");
        row.fill(0.0);
        (0, row.len())
    };

    row[..lo].fill(0.0);
    row[hi..].fill(0.0);
    let inside = &mut row[lo..hi];
    for w in inside.iter_mut() {
        *w = w.max(epsilon);
    }
    let total: f32 = inside.iter().sum();
    for w in inside.iter_mut() {
        *w /= total;
    }
}
