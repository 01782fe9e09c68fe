//! Autoregressive decode loop.
//!
//! Orchestrates one conversion of an encoded source utterance:
//! 1. Start from an all-zero frame and empty decoder state
//! 2. For each step: add the step's position encoding to the fed-back frame,
//!    run the step decoder with the request's alignment policy, record the
//!    frame and the attention row
//! 3. After the fixed step budget, derive the alignment path and the
//!    truncation index from the attention matrix
//!
//! The step budget is fixed (`round(2N)` for raw/forward, `N` for diagonal);
//! there is no early stop. Where the output actually ends is decided
//! afterwards by DTW.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::Tensor;

use crate::align::{
    Aligner, AlignmentPath, AttentionMatrix, DiagonalAlignment, ForwardAttention, RawAttention,
};
use crate::config::{AttentionMode, DecodeConfig};
use crate::model::decoder::StepDecoder;
use crate::model::position::PositionEncoding;
use crate::model::{Context, Transform};
use crate::{Error, Result};

/// Cooperative cancellation, checked between decode steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of one decode run.
#[derive(Debug, Clone)]
pub struct Conversion {
    mode: AttentionMode,
    /// All generated frames `[frame_channels, steps]`.
    frames: Tensor,
    attention: AttentionMatrix,
    path: AlignmentPath,
    truncation: usize,
}

impl Conversion {
    pub fn mode(&self) -> AttentionMode {
        self.mode
    }

    /// Every generated frame, before truncation.
    pub fn frames(&self) -> &Tensor {
        &self.frames
    }

    pub fn attention(&self) -> &AttentionMatrix {
        &self.attention
    }

    pub fn path(&self) -> &AlignmentPath {
        &self.path
    }

    /// Number of leading frames that make up the converted utterance.
    pub fn truncation(&self) -> usize {
        self.truncation
    }

    /// Decode steps taken.
    pub fn steps(&self) -> usize {
        self.attention.steps()
    }

    /// Frames `0..truncation`.
    pub fn truncated_frames(&self) -> Result<Tensor> {
        let len = self.truncation.min(self.steps());
        Ok(self.frames.narrow(1, 0, len)?)
    }

    /// Attention columns `0..truncation`.
    pub fn truncated_attention(&self) -> AttentionMatrix {
        self.attention.truncated(self.truncation)
    }
}

/// Decode `context` with the transforms behind `decoder`.
///
/// The policy is taken from `config.attention_mode` and fixed for the whole
/// run. `conditioning` is passed unchanged to both transforms at every step.
pub fn decode<B: Transform, R: Transform>(
    context: &Context,
    conditioning: &Tensor,
    decoder: StepDecoder<'_, B, R>,
    config: &DecodeConfig,
    cancel: Option<&CancelFlag>,
) -> Result<Conversion> {
    config.validate()?;
    match config.attention_mode {
        AttentionMode::Raw => run(RawAttention, context, conditioning, decoder, config, cancel),
        AttentionMode::Diagonal => {
            run(DiagonalAlignment, context, conditioning, decoder, config, cancel)
        }
        AttentionMode::Forward => {
            let aligner = ForwardAttention::new(config.forward, config.reduction_factor);
            run(aligner, context, conditioning, decoder, config, cancel)
        }
    }
}

fn run<A: Aligner, B: Transform, R: Transform>(
    mut aligner: A,
    context: &Context,
    conditioning: &Tensor,
    mut decoder: StepDecoder<'_, B, R>,
    config: &DecodeConfig,
    cancel: Option<&CancelFlag>,
) -> Result<Conversion> {
    let source_len = context.source_len();
    let budget = config.step_budget(source_len).max(1);
    let frame_channels = decoder.frame_channels();
    let (dtype, device) = (context.dtype(), context.device());

    tracing::debug!(
        mode = %aligner.mode(),
        source_len,
        budget,
        frame_channels,
        "decode start"
    );

    let positions = PositionEncoding::new(budget, frame_channels, config.pos_weight, dtype, device)?;
    let mut attention = AttentionMatrix::with_capacity(source_len, budget);
    let mut frames = Vec::with_capacity(budget);
    let mut frame = Tensor::zeros((frame_channels, 1), dtype, device)?;

    for step in 0..budget {
        if let Some(flag) = cancel
            && flag.is_cancelled()
        {
            tracing::debug!(step, "decode cancelled");
            return Err(Error::Cancelled { step });
        }

        let input = positions.add_to(&frame, step)?;
        let (next, row) = decoder.step(&input, conditioning, |query| {
            let out = aligner.attend(step, query, context)?;
            Ok((out.attended, out.row))
        })?;

        attention.push(row)?;
        frames.push(next.clone());
        frame = next;
    }

    let (path, truncation) = aligner.finish(&attention, &config.endpoint);
    let frames = Tensor::cat(&frames, 1)?;

    tracing::debug!(
        mode = %aligner.mode(),
        steps = attention.steps(),
        truncation,
        path_len = path.len(),
        "decode done"
    );

    Ok(Conversion {
        mode: aligner.mode(),
        frames,
        attention,
        path,
        truncation,
    })
}
