//! One autoregressive decoder step.
//!
//! Each step pairs the two learned transforms:
//!
//! ```text
//! prev frame ──► context builder ──► query ──► attend ──► attended
//!                                      │                     │
//!                                      └──── cat[attended, query] ──► regenerator ──► frame
//! ```
//!
//! The builder's state only reaches the regenerator through the query it
//! produces. Dropout on the query is disabled at inference time, so the
//! concatenation passes the query through unchanged.

use candle_core::Tensor;

use super::Transform;
use crate::{Error, Result};

/// Drives the context builder and frame regenerator for one decode run.
///
/// Owns the recurrent state of both transforms. A fresh decoder starts with
/// no state; each step replaces it.
pub struct StepDecoder<'a, B: Transform, R: Transform> {
    builder: &'a B,
    regenerator: &'a R,
    frame_channels: usize,
    builder_state: Option<B::State>,
    regenerator_state: Option<R::State>,
}

impl<'a, B: Transform, R: Transform> StepDecoder<'a, B, R> {
    /// `frame_channels` is the width of the frames the regenerator produces
    /// and the builder consumes.
    pub fn new(builder: &'a B, regenerator: &'a R, frame_channels: usize) -> Self {
        Self {
            builder,
            regenerator,
            frame_channels,
            builder_state: None,
            regenerator_state: None,
        }
    }

    pub fn frame_channels(&self) -> usize {
        self.frame_channels
    }

    /// Run one step.
    ///
    /// `attend` maps the query to the vector fed to the regenerator next to
    /// the query, plus any side output (the attention row) which is returned
    /// alongside the new frame.
    pub fn step<T, F>(
        &mut self,
        prev_frame: &Tensor,
        conditioning: &Tensor,
        attend: F,
    ) -> Result<(Tensor, T)>
    where
        F: FnOnce(&Tensor) -> Result<(Tensor, T)>,
    {
        let (query, builder_state) =
            self.builder
                .transform(prev_frame, conditioning, self.builder_state.take())?;
        self.builder_state = Some(builder_state);

        let (attended, side) = attend(&query)?;
        let reconstructed = Tensor::cat(&[&attended, &query], 0)?;

        let (frame, regenerator_state) = self.regenerator.transform(
            &reconstructed,
            conditioning,
            self.regenerator_state.take(),
        )?;
        self.regenerator_state = Some(regenerator_state);

        let channels = frame.dim(0)?;
        if channels != self.frame_channels {
            return Err(Error::ChannelMismatch {
                what: "regenerated frame channels",
                expected: self.frame_channels,
                actual: channels,
            });
        }
        Ok((frame, side))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::cell::RefCell;

    /// Returns a constant query and counts calls in its state.
    struct CountingBuilder {
        query: Tensor,
        seen: RefCell<Vec<Option<usize>>>,
    }

    impl Transform for CountingBuilder {
        type State = usize;

        fn transform(
            &self,
            _input: &Tensor,
            _conditioning: &Tensor,
            state: Option<usize>,
        ) -> Result<(Tensor, usize)> {
            self.seen.borrow_mut().push(state);
            Ok((self.query.clone(), state.map_or(1, |n| n + 1)))
        }
    }

    /// Records the width of its input and emits the first `width` rows.
    struct Truncate {
        width: usize,
        inputs: RefCell<Vec<usize>>,
    }

    impl Transform for Truncate {
        type State = ();

        fn transform(
            &self,
            input: &Tensor,
            _conditioning: &Tensor,
            _state: Option<()>,
        ) -> Result<(Tensor, ())> {
            self.inputs.borrow_mut().push(input.dim(0)?);
            Ok((input.narrow(0, 0, self.width)?, ()))
        }
    }

    fn column(values: &[f32]) -> Tensor {
        Tensor::from_slice(values, (values.len(), 1), &Device::Cpu).unwrap()
    }

    #[test]
    fn state_threads_through_steps() {
        let builder = CountingBuilder {
            query: column(&[1.0, 2.0]),
            seen: RefCell::new(Vec::new()),
        };
        let regenerator = Truncate {
            width: 3,
            inputs: RefCell::new(Vec::new()),
        };
        let cond = Tensor::zeros((1, 1), DType::F32, &Device::Cpu).unwrap();
        let mut decoder = StepDecoder::new(&builder, &regenerator, 3);

        let mut frame = Tensor::zeros((3, 1), DType::F32, &Device::Cpu).unwrap();
        for step in 0..3 {
            let (next, side) = decoder
                .step(&frame, &cond, |_q| Ok((column(&[9.0, 8.0, 7.0]), step)))
                .unwrap();
            assert_eq!(side, step);
            frame = next;
        }

        assert_eq!(*builder.seen.borrow(), vec![None, Some(1), Some(2)]);
        // attended (3) + query (2)
        assert_eq!(*regenerator.inputs.borrow(), vec![5, 5, 5]);
        let out: Vec<f32> = frame.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(out, vec![9.0, 8.0, 7.0]);
    }

    #[test]
    fn query_is_passed_through_after_attended() {
        let builder = CountingBuilder {
            query: column(&[1.0, 2.0]),
            seen: RefCell::new(Vec::new()),
        };
        // Keep the whole reconstruction to inspect it.
        let regenerator = Truncate {
            width: 4,
            inputs: RefCell::new(Vec::new()),
        };
        let cond = Tensor::zeros((1, 1), DType::F32, &Device::Cpu).unwrap();
        let mut decoder = StepDecoder::new(&builder, &regenerator, 4);
        let frame = Tensor::zeros((4, 1), DType::F32, &Device::Cpu).unwrap();

        let (out, ()) = decoder
            .step(&frame, &cond, |_q| Ok((column(&[5.0, 6.0]), ())))
            .unwrap();
        let out: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(out, vec![5.0, 6.0, 1.0, 2.0]);
    }

    #[test]
    fn wrong_frame_width_is_an_error() {
        let builder = CountingBuilder {
            query: column(&[1.0]),
            seen: RefCell::new(Vec::new()),
        };
        let regenerator = Truncate {
            width: 2,
            inputs: RefCell::new(Vec::new()),
        };
        let cond = Tensor::zeros((1, 1), DType::F32, &Device::Cpu).unwrap();
        let mut decoder = StepDecoder::new(&builder, &regenerator, 3);
        let frame = Tensor::zeros((3, 1), DType::F32, &Device::Cpu).unwrap();

        let result = decoder.step(&frame, &cond, |_q| Ok((column(&[0.0]), ())));
        assert!(matches!(
            result,
            Err(Error::ChannelMismatch { expected: 3, actual: 2, .. })
        ));
    }
}
