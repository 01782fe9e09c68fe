//! Scaled dot-product attention of decoder queries over the source context.
//!
//! ```text
//! A = softmax_N(Kᵀ · Q / sqrt(d))    // [N, T]
//! R = V · A                          // [d_v, T]
//! ```
//!
//! The softmax is taken over the source axis and subtracts the per-column
//! maximum before exponentiation, so arbitrarily large scores stay finite.

use candle_core::{DType, Tensor};

use super::Context;
use crate::{Error, Result};

/// Output of one attention call.
#[derive(Debug, Clone)]
pub struct Attended {
    /// Weighted sum of values, `[d_v, T]`.
    pub vector: Tensor,
    /// Attention weights, `[N, T]`; every column sums to one.
    pub weights: Tensor,
}

/// Attend `query` (`[d, T]`) over `context`.
pub fn scaled_dot_product(query: &Tensor, context: &Context) -> Result<Attended> {
    let (channels, _) = query.dims2()?;
    if channels != context.channels() {
        return Err(Error::ChannelMismatch {
            what: "query channels",
            expected: context.channels(),
            actual: channels,
        });
    }

    let scale = (channels as f64).sqrt();
    let scores = (context.keys_t().matmul(query)? / scale)?;
    let weights = candle_nn::ops::softmax(&scores, 0)?;
    let vector = context.values().matmul(&weights)?;

    Ok(Attended { vector, weights })
}

/// Weighted sum of values for externally supplied weights (`[N]`).
pub fn weighted_values(weights: &[f32], context: &Context) -> Result<Tensor> {
    if weights.len() != context.source_len() {
        return Err(Error::ChannelMismatch {
            what: "attention row length",
            expected: context.source_len(),
            actual: weights.len(),
        });
    }
    let weights = Tensor::from_slice(weights, (weights.len(), 1), context.device())?
        .to_dtype(context.dtype())?;
    Ok(context.values().matmul(&weights)?)
}

/// Flatten a single-column weight tensor into an `f32` row.
pub fn weights_row(weights: &Tensor) -> Result<Vec<f32>> {
    Ok(weights.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?)
}
