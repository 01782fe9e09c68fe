//! Deterministic stand-ins for the learned transforms.
//!
//! Used to exercise the decode loop without trained weights: they make the
//! attention pattern a known function of the step index.

use candle_core::Tensor;

use super::{ContextEncoder, Transform};
use crate::Result;

/// Uses the source features directly as both keys and values.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityEncoder;

impl ContextEncoder for IdentityEncoder {
    fn encode(&self, source: &Tensor) -> Result<(Tensor, Tensor)> {
        Ok((source.clone(), source.clone()))
    }
}

/// Always emits an all-zero query, which yields uniform attention.
#[derive(Debug, Clone, Copy)]
pub struct ZeroQuery {
    pub channels: usize,
}

impl Transform for ZeroQuery {
    type State = ();

    fn transform(
        &self,
        input: &Tensor,
        _conditioning: &Tensor,
        _state: Option<()>,
    ) -> Result<(Tensor, ())> {
        let query = Tensor::zeros((self.channels, 1), input.dtype(), input.device())?;
        Ok((query, ()))
    }
}

/// Emits key column `min(step, N - 1)` times `gain`, so attention walks the
/// diagonal and then rests on the last source position.
#[derive(Debug, Clone)]
pub struct DiagonalQuery {
    keys: Tensor,
    gain: f64,
}

impl DiagonalQuery {
    /// `keys` is the `[d, N]` key matrix of the context being decoded.
    pub fn new(keys: Tensor, gain: f64) -> Self {
        Self { keys, gain }
    }
}

impl Transform for DiagonalQuery {
    /// Steps taken so far.
    type State = usize;

    fn transform(
        &self,
        _input: &Tensor,
        _conditioning: &Tensor,
        state: Option<usize>,
    ) -> Result<(Tensor, usize)> {
        let step = state.unwrap_or(0);
        let last = self.keys.dim(1)?.saturating_sub(1);
        let query = self.keys.narrow(1, step.min(last), 1)?.affine(self.gain, 0.0)?;
        Ok((query, step + 1))
    }
}

/// Emits the first `frame_channels` rows of its input, i.e. the attended
/// vector when that is at least as wide as a frame.
#[derive(Debug, Clone, Copy)]
pub struct AttendedPassthrough {
    pub frame_channels: usize,
}

impl Transform for AttendedPassthrough {
    type State = ();

    fn transform(
        &self,
        input: &Tensor,
        _conditioning: &Tensor,
        _state: Option<()>,
    ) -> Result<(Tensor, ())> {
        let frame = input.narrow(0, 0, self.frame_channels)?.contiguous()?;
        Ok((frame, ()))
    }
}
