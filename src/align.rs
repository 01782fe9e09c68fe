//! Alignment between source positions and generated frames.
//!
//! - [`policy`] — the three per-step alignment policies (raw, diagonal, forward)
//! - [`tracker`] — online peak tracker that bounds the forward policy's window
//! - [`dtw`] — banded DTW over the finished attention matrix, used to find
//!   where the generated sequence ends
//!
//! ## Attention matrix
//!
//! One column per decode step, one row per source position. Columns are
//! appended during decoding and never modified afterwards.

pub mod dtw;
pub mod policy;
pub mod tracker;

pub use dtw::{AlignmentPath, DistanceMatrix, DtwAligner};
pub use policy::{Aligner, AlignerStep, DiagonalAlignment, ForwardAttention, RawAttention};
pub use tracker::PeakTracker;

use candle_core::{Device, Tensor};

use crate::{Error, Result};

/// Attention weights of a decode run, stored column-major (one `Vec` per step).
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionMatrix {
    source_len: usize,
    columns: Vec<Vec<f32>>,
}

impl AttentionMatrix {
    /// Empty matrix with room for `steps` columns.
    pub fn with_capacity(source_len: usize, steps: usize) -> Self {
        Self {
            source_len,
            columns: Vec::with_capacity(steps),
        }
    }

    /// Build from existing columns, each of length `source_len`.
    pub fn from_columns(source_len: usize, columns: Vec<Vec<f32>>) -> Result<Self> {
        let mut matrix = Self::with_capacity(source_len, columns.len());
        for column in columns {
            matrix.push(column)?;
        }
        Ok(matrix)
    }

    /// Append the attention row of the next step.
    pub fn push(&mut self, column: Vec<f32>) -> Result<()> {
        if column.len() != self.source_len {
            return Err(Error::ChannelMismatch {
                what: "attention row length",
                expected: self.source_len,
                actual: column.len(),
            });
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn source_len(&self) -> usize {
        self.source_len
    }

    /// Number of decode steps recorded.
    pub fn steps(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.source_len == 0
    }

    /// Attention row of `step`.
    pub fn column(&self, step: usize) -> &[f32] {
        &self.columns[step]
    }

    pub fn columns(&self) -> impl Iterator<Item = &[f32]> {
        self.columns.iter().map(Vec::as_slice)
    }

    /// Weight of source position `source` at decode step `step`.
    pub fn get(&self, source: usize, step: usize) -> f32 {
        self.columns[step][source]
    }

    /// First `steps` columns.
    pub fn truncated(&self, steps: usize) -> Self {
        Self {
            source_len: self.source_len,
            columns: self.columns[..steps.min(self.columns.len())].to_vec(),
        }
    }

    /// Dense `[source_len, steps]` tensor.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let steps = self.steps();
        let mut data = vec![0f32; self.source_len * steps];
        for (t, column) in self.columns.iter().enumerate() {
            for (n, &w) in column.iter().enumerate() {
                data[n * steps + t] = w;
            }
        }
        Ok(Tensor::from_vec(data, (self.source_len, steps), device)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_checks_row_length() {
        let mut m = AttentionMatrix::with_capacity(3, 2);
        m.push(vec![0.2, 0.3, 0.5]).unwrap();
        assert!(m.push(vec![1.0]).is_err());
        assert_eq!(m.steps(), 1);
        assert_eq!(m.get(2, 0), 0.5);
    }

    #[test]
    fn dense_layout_is_source_by_step() {
        let m = AttentionMatrix::from_columns(
            2,
            vec![vec![1.0, 0.0], vec![0.25, 0.75], vec![0.0, 1.0]],
        )
        .unwrap();
        let t = m.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(t.dims(), &[2, 3]);
        let rows = t.to_vec2::<f32>().unwrap();
        assert_eq!(rows[0], vec![1.0, 0.25, 0.0]);
        assert_eq!(rows[1], vec![0.0, 0.75, 1.0]);
    }

    #[test]
    fn truncation_keeps_leading_steps() {
        let m = AttentionMatrix::from_columns(1, vec![vec![1.0], vec![1.0], vec![1.0]]).unwrap();
        assert_eq!(m.truncated(2).steps(), 2);
        assert_eq!(m.truncated(10).steps(), 3);
        assert!(m.truncated(0).is_empty());
    }
}
