//! Model-side building blocks of the ConvS2S decoder.
//!
//! The learned networks (encoder, context builder, frame regenerator) are
//! collaborators: this crate only needs their call contracts, expressed as
//! the [`ContextEncoder`] and [`Transform`] traits. Concrete weights plug in
//! behind them; [`stub`] provides deterministic stand-ins.
//!
//! ## Components
//!
//! - [`attention`] — scaled dot-product attention over a [`Context`]
//! - [`decoder`] — one autoregressive step through the two learned transforms
//! - [`position`] — sinusoidal position encoding added to decoder inputs

pub mod attention;
pub mod decoder;
pub mod position;
pub mod stub;

use candle_core::{DType, Device, Tensor};

use crate::{Error, Result};

/// Maps stacked source features `[D, N]` to key/value context `([d, N], [d_v, N])`.
///
/// Called exactly once per converted segment.
pub trait ContextEncoder {
    fn encode(&self, source: &Tensor) -> Result<(Tensor, Tensor)>;
}

/// A learned autoregressive transform with recurrent state.
///
/// `state` is `None` on the first call of a decode run. The returned state
/// replaces the previous one; it is never merged.
pub trait Transform {
    type State;

    fn transform(
        &self,
        input: &Tensor,
        conditioning: &Tensor,
        state: Option<Self::State>,
    ) -> Result<(Tensor, Self::State)>;
}

/// Key/value context of one source utterance.
///
/// Immutable for the duration of a decode run.
#[derive(Debug, Clone)]
pub struct Context {
    keys: Tensor,
    /// `keys` transposed to `[N, d]`, laid out once for the per-step matmul.
    keys_t: Tensor,
    values: Tensor,
    channels: usize,
    source_len: usize,
}

impl Context {
    /// Wrap encoder output. Keys are `[d, N]`, values `[d_v, N]`.
    pub fn new(keys: Tensor, values: Tensor) -> Result<Self> {
        let (channels, source_len) = keys.dims2()?;
        let (_, value_len) = values.dims2()?;
        if source_len == 0 {
            return Err(Error::EmptyContext);
        }
        if value_len != source_len {
            return Err(Error::ChannelMismatch {
                what: "value source length",
                expected: source_len,
                actual: value_len,
            });
        }
        let keys_t = keys.t()?.contiguous()?;
        Ok(Self {
            keys,
            keys_t,
            values,
            channels,
            source_len,
        })
    }

    pub fn keys(&self) -> &Tensor {
        &self.keys
    }

    /// Keys as `[N, d]`.
    pub fn keys_t(&self) -> &Tensor {
        &self.keys_t
    }

    pub fn values(&self) -> &Tensor {
        &self.values
    }

    /// Key (and query) dimension `d`.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of source positions `N`.
    pub fn source_len(&self) -> usize {
        self.source_len
    }

    pub fn device(&self) -> &Device {
        self.keys.device()
    }

    pub fn dtype(&self) -> DType {
        self.keys.dtype()
    }

    /// Value column at `position` as `[d_v, 1]`.
    pub fn value_at(&self, position: usize) -> Result<Tensor> {
        Ok(self.values.narrow(1, position, 1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_shapes() {
        let dev = Device::Cpu;
        let keys = Tensor::zeros((8, 5), DType::F32, &dev).unwrap();
        let values = Tensor::zeros((6, 5), DType::F32, &dev).unwrap();
        let ctx = Context::new(keys, values).unwrap();
        assert_eq!(ctx.channels(), 8);
        assert_eq!(ctx.source_len(), 5);
        assert_eq!(ctx.keys_t().dims(), &[5, 8]);
        assert_eq!(ctx.value_at(4).unwrap().dims(), &[6, 1]);
    }

    #[test]
    fn test_context_rejects_empty() {
        let dev = Device::Cpu;
        let keys = Tensor::zeros((8, 0), DType::F32, &dev).unwrap();
        let values = Tensor::zeros((8, 0), DType::F32, &dev).unwrap();
        assert!(matches!(
            Context::new(keys, values),
            Err(Error::EmptyContext)
        ));
    }

    #[test]
    fn test_context_rejects_length_mismatch() {
        let dev = Device::Cpu;
        let keys = Tensor::zeros((8, 5), DType::F32, &dev).unwrap();
        let values = Tensor::zeros((8, 4), DType::F32, &dev).unwrap();
        match Context::new(keys, values) {
            Err(Error::ChannelMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 5);
                assert_eq!(actual, 4);
            }
            other => panic!("expected ChannelMismatch, got {other:?}"),
        }
    }
}
