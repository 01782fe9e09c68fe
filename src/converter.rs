//! Mel spectrogram conversion towards a target speaker.
//!
//! Wraps the three learned networks and the decode loop:
//!
//! ```text
//! mel [num_mels, frames]
//!   → stack by rf → + source position encoding → encoder → (K, V)
//!   → decode (one-hot target conditioning) → frames 0..truncation
//!   → unstack → mel [num_mels, truncation * rf]
//! ```
//!
//! Segments of one request are independent and converted on rayon's pool.

use candle_core::{Device, Tensor};
use rayon::prelude::*;

use crate::config::ConverterConfig;
use crate::features::{stack_frames, unstack_frames};
use crate::model::decoder::StepDecoder;
use crate::model::position::PositionEncoding;
use crate::model::{Context, ContextEncoder, Transform};
use crate::pipeline::{CancelFlag, Conversion, decode};
use crate::{Error, Result};

/// One converted segment with its decode trace.
#[derive(Debug, Clone)]
pub struct ConvertedSegment {
    /// Converted mel spectrogram `[num_mels, truncation * rf]`.
    pub mel: Tensor,
    pub conversion: Conversion,
}

/// Converts mel spectrograms with a trained ConvS2S mapper.
pub struct SpectrogramConverter<E, B, R> {
    encoder: E,
    builder: B,
    regenerator: R,
    config: ConverterConfig,
}

impl<E, B, R> SpectrogramConverter<E, B, R>
where
    E: ContextEncoder,
    B: Transform,
    R: Transform,
{
    pub fn new(encoder: E, builder: B, regenerator: R, config: ConverterConfig) -> Result<Self> {
        config.decode_config().validate()?;
        Ok(Self {
            encoder,
            builder,
            regenerator,
            config,
        })
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// One-hot `[speakers, 1]` conditioning column for `target`.
    pub fn conditioning(&self, target: &str, device: &Device) -> Result<Tensor> {
        let index = self.config.speaker_index(target)?;
        let mut one_hot = vec![0f32; self.config.speakers.len()];
        one_hot[index] = 1.0;
        Ok(Tensor::from_vec(one_hot, (self.config.speakers.len(), 1), device)?)
    }

    /// Convert a single mel spectrogram `[num_mels, frames]`.
    pub fn convert_segment(
        &self,
        mel: &Tensor,
        target: &str,
        cancel: Option<&CancelFlag>,
    ) -> Result<ConvertedSegment> {
        let conditioning = self.conditioning(target, mel.device())?;
        self.convert_conditioned(mel, &conditioning, cancel)
    }

    fn convert_conditioned(
        &self,
        mel: &Tensor,
        conditioning: &Tensor,
        cancel: Option<&CancelFlag>,
    ) -> Result<ConvertedSegment> {
        let (mels, frames) = mel.dims2()?;
        if mels != self.config.num_mels {
            return Err(Error::ChannelMismatch {
                what: "mel bins",
                expected: self.config.num_mels,
                actual: mels,
            });
        }
        let rf = self.config.reduction_factor;
        let frame_channels = self.config.frame_channels();

        let stacked = stack_frames(mel, rf)?;
        let source_len = stacked.dim(1)?;
        if source_len == 0 {
            return Err(Error::EmptyContext);
        }
        let positions = PositionEncoding::new(
            source_len,
            frame_channels,
            self.config.pos_weight,
            stacked.dtype(),
            stacked.device(),
        )?;
        let (keys, values) = self.encoder.encode(&positions.add_to_sequence(&stacked)?)?;
        let context = Context::new(keys, values)?;

        let decoder = StepDecoder::new(&self.builder, &self.regenerator, frame_channels);
        let conversion = decode(
            &context,
            conditioning,
            decoder,
            &self.config.decode_config(),
            cancel,
        )?;
        let mel = unstack_frames(&conversion.truncated_frames()?, rf)?;

        tracing::info!(
            mode = %conversion.mode(),
            frames,
            source_len,
            steps = conversion.steps(),
            truncation = conversion.truncation(),
            "segment converted"
        );
        Ok(ConvertedSegment { mel, conversion })
    }
}

impl<E, B, R> SpectrogramConverter<E, B, R>
where
    E: ContextEncoder + Sync,
    B: Transform + Sync,
    R: Transform + Sync,
{
    /// Convert every segment towards `target`, preserving order.
    ///
    /// Fails if any segment fails.
    pub fn convert(
        &self,
        segments: &[Tensor],
        target: &str,
        cancel: Option<&CancelFlag>,
    ) -> Result<Vec<ConvertedSegment>> {
        // Resolved up front so an unknown target fails before any work starts.
        let index = self.config.speaker_index(target)?;
        tracing::debug!(segments = segments.len(), target, index, "converting");

        segments
            .par_iter()
            .map(|mel| {
                let conditioning = self.conditioning(target, mel.device())?;
                self.convert_conditioned(mel, &conditioning, cancel)
            })
            .collect()
    }
}

/// Object-safe view of a converter, as held by the manager.
pub trait VoiceConversion: Send + Sync {
    /// Speakers this converter can target.
    fn speakers(&self) -> &[String];

    /// Converted mel spectrograms, one per input segment.
    fn convert(
        &self,
        segments: &[Tensor],
        target: &str,
        cancel: Option<&CancelFlag>,
    ) -> Result<Vec<Tensor>>;
}

impl<E, B, R> VoiceConversion for SpectrogramConverter<E, B, R>
where
    E: ContextEncoder + Send + Sync,
    B: Transform + Send + Sync,
    R: Transform + Send + Sync,
{
    fn speakers(&self) -> &[String] {
        &self.config.speakers
    }

    fn convert(
        &self,
        segments: &[Tensor],
        target: &str,
        cancel: Option<&CancelFlag>,
    ) -> Result<Vec<Tensor>> {
        let converted = SpectrogramConverter::convert(self, segments, target, cancel)?;
        Ok(converted.into_iter().map(|segment| segment.mel).collect())
    }
}
