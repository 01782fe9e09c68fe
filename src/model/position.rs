//! Sinusoidal position encoding for decoder and encoder inputs.
//!
//! Positions and frequency indices both start at 1; sine and cosine rows are
//! interleaved:
//!
//! ```text
//! rad(p, u)     = p / 10000^(u / (C/2))      p = 1..=L, u = 1..=C/2
//! PE[2(u-1), p] = sin(rad)
//! PE[2u-1,   p] = cos(rad)
//! ```
//!
//! For odd `C` the last row stays zero. The table is built in `f64` on the
//! host so it is bit-identical across runs and devices.

use candle_core::{DType, Device, Tensor};

use crate::{Error, Result};

/// Raw position-encoding table `[channels, length]` in `f32`.
pub fn position_encoding(length: usize, channels: usize, device: &Device) -> Result<Tensor> {
    let half = channels / 2;
    let mut data = vec![0f32; channels * length];
    for u in 1..=half {
        let denom = 10000f64.powf(u as f64 / half as f64);
        let sin_row = 2 * (u - 1);
        let cos_row = sin_row + 1;
        for p in 1..=length {
            let rad = p as f64 / denom;
            data[sin_row * length + p - 1] = rad.sin() as f32;
            data[cos_row * length + p - 1] = rad.cos() as f32;
        }
    }
    Ok(Tensor::from_vec(data, (channels, length), device)?)
}

/// Embedding scale for a `channels`-wide frame: `sqrt(channels)`.
pub fn embedding_scale(channels: usize) -> f64 {
    (channels as f64).sqrt()
}

/// Position table pre-scaled by `weight / sqrt(channels)`.
#[derive(Debug, Clone)]
pub struct PositionEncoding {
    table: Tensor,
    length: usize,
}

impl PositionEncoding {
    pub fn new(
        length: usize,
        channels: usize,
        weight: f64,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let factor = weight / embedding_scale(channels).max(f64::MIN_POSITIVE);
        let table = position_encoding(length, channels, device)?
            .affine(factor, 0.0)?
            .to_dtype(dtype)?;
        Ok(Self { table, length })
    }

    /// Scaled table `[channels, length]`.
    pub fn table(&self) -> &Tensor {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Add the encoding of `step` to a single frame `[channels, 1]`.
    pub fn add_to(&self, frame: &Tensor, step: usize) -> Result<Tensor> {
        let column = self.table.narrow(1, step, 1)?;
        Ok(frame.broadcast_add(&column)?)
    }

    /// Add the encoding to a whole sequence `[channels, length]`.
    pub fn add_to_sequence(&self, features: &Tensor) -> Result<Tensor> {
        let (_, length) = features.dims2()?;
        if length != self.length {
            return Err(Error::ChannelMismatch {
                what: "sequence length for position encoding",
                expected: self.length,
                actual: length,
            });
        }
        Ok(features.broadcast_add(&self.table)?)
    }
}
