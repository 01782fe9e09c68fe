//! Configuration for decoding, conversion and the conversion manager.
//!
//! Defaults match the values the ConvS2S mapper was trained and served with:
//! step budget `2 × N`, attention sharpening exponent `0.3`, DTW band of 100
//! frames with a `0.1` slope bias, and a forward window of `[-20, +40)`
//! frames before frame stacking.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Alignment policy selected once per conversion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionMode {
    /// Full attention over the context at every step.
    #[default]
    Raw,
    /// No learned attention; step `t` reads context position `t`.
    Diagonal,
    /// Full attention masked to a window around a tracked peak.
    Forward,
}

impl std::fmt::Display for AttentionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttentionMode::Raw => "raw",
            AttentionMode::Diagonal => "diagonal",
            AttentionMode::Forward => "forward",
        };
        f.write_str(name)
    }
}

/// Endpoint detection (DTW over the attention matrix).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Attention is raised to this power before `1 - a` becomes the distance.
    #[serde(default = "default_attention_exponent")]
    pub attention_exponent: f64,

    /// Maximum distance of a DTW cell from the main diagonal.
    #[serde(default = "default_window")]
    pub window: usize,

    /// Extra cost for a move that advances only one axis.
    #[serde(default = "default_slope_bias")]
    pub slope_bias: f64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            attention_exponent: default_attention_exponent(),
            window: default_window(),
            slope_bias: default_slope_bias(),
        }
    }
}

/// Forward-attention window and peak tracking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForwardWindowConfig {
    /// Frames kept behind the tracked peak (divided by the reduction factor).
    #[serde(default = "default_lookbehind")]
    pub lookbehind: usize,

    /// Frames kept ahead of the tracked peak (divided by the reduction factor).
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,

    /// A scan for the local peak stops once attention falls below
    /// `running_max / peak_dropoff`.
    #[serde(default = "default_peak_dropoff")]
    pub peak_dropoff: f32,

    /// Floor applied inside the window before renormalizing.
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
}

impl Default for ForwardWindowConfig {
    fn default() -> Self {
        Self {
            lookbehind: default_lookbehind(),
            lookahead: default_lookahead(),
            peak_dropoff: default_peak_dropoff(),
            epsilon: default_epsilon(),
        }
    }
}

impl ForwardWindowConfig {
    /// Window `[lo, hi)` around `peak` for a context of `source_len` positions,
    /// clipped to the context.
    ///
    /// Empty (`lo == hi`) when the peak has run past the end of the context
    /// or both sides round down to zero frames.
    pub fn window(&self, peak: usize, reduction_factor: usize, source_len: usize) -> (usize, usize) {
        let rf = reduction_factor.max(1);
        let hi = peak.saturating_add(self.lookahead / rf).min(source_len);
        let lo = peak.saturating_sub(self.lookbehind / rf).min(hi);
        (lo, hi)
    }
}

/// Parameters of one decode run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodeConfig {
    #[serde(default)]
    pub attention_mode: AttentionMode,

    /// Frames stacked into one decoder step by the feature front-end.
    #[serde(default = "default_reduction_factor")]
    pub reduction_factor: usize,

    /// Multiplier on the position encoding added to fed-back frames.
    #[serde(default = "default_pos_weight")]
    pub pos_weight: f64,

    /// Raw/forward budget is `round(step_budget_ratio × source_len)`.
    #[serde(default = "default_step_budget_ratio")]
    pub step_budget_ratio: f64,

    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub forward: ForwardWindowConfig,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            attention_mode: AttentionMode::default(),
            reduction_factor: default_reduction_factor(),
            pos_weight: default_pos_weight(),
            step_budget_ratio: default_step_budget_ratio(),
            endpoint: EndpointConfig::default(),
            forward: ForwardWindowConfig::default(),
        }
    }
}

impl DecodeConfig {
    /// Default configuration with the given policy.
    pub fn with_mode(attention_mode: AttentionMode) -> Self {
        Self {
            attention_mode,
            ..Default::default()
        }
    }

    /// Reject values the decode loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.reduction_factor == 0 {
            return Err(Error::Config("reduction_factor must be at least 1".into()));
        }
        if !self.step_budget_ratio.is_finite() || self.step_budget_ratio <= 0.0 {
            return Err(Error::Config(format!(
                "step_budget_ratio must be positive, got {}",
                self.step_budget_ratio
            )));
        }
        if !self.pos_weight.is_finite() {
            return Err(Error::Config("pos_weight must be finite".into()));
        }
        if self.forward.peak_dropoff.is_nan() || self.forward.peak_dropoff <= 0.0 {
            return Err(Error::Config("forward.peak_dropoff must be positive".into()));
        }
        Ok(())
    }

    /// Number of decode steps for a context of `source_len` positions.
    pub fn step_budget(&self, source_len: usize) -> usize {
        match self.attention_mode {
            AttentionMode::Diagonal => source_len,
            AttentionMode::Raw | AttentionMode::Forward => {
                (self.step_budget_ratio * source_len as f64).round_ties_even() as usize
            }
        }
    }
}

/// Mapper configuration, as shipped next to a trained model.
///
/// Unknown keys (layer sizes and other training hyper-parameters) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Mel bins per frame before stacking.
    pub num_mels: usize,

    #[serde(default = "default_reduction_factor")]
    pub reduction_factor: usize,

    #[serde(default = "default_pos_weight")]
    pub pos_weight: f64,

    /// Speakers known to the model; the index is the conditioning slot.
    #[serde(alias = "spk_list")]
    pub speakers: Vec<String>,

    #[serde(default)]
    pub attention_mode: AttentionMode,

    #[serde(default = "default_step_budget_ratio")]
    pub step_budget_ratio: f64,

    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub forward: ForwardWindowConfig,
}

impl ConverterConfig {
    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.decode_config().validate()?;
        if config.num_mels == 0 {
            return Err(Error::Config("num_mels must be at least 1".into()));
        }
        Ok(config)
    }

    /// Width of one stacked decoder frame.
    pub fn frame_channels(&self) -> usize {
        self.num_mels * self.reduction_factor
    }

    /// Conditioning slot of `speaker`.
    pub fn speaker_index(&self, speaker: &str) -> Result<usize> {
        self.speakers
            .iter()
            .position(|s| s == speaker)
            .ok_or_else(|| Error::UnknownSpeaker(speaker.to_string()))
    }

    /// Decode parameters derived from this mapper configuration.
    pub fn decode_config(&self) -> DecodeConfig {
        DecodeConfig {
            attention_mode: self.attention_mode,
            reduction_factor: self.reduction_factor,
            pos_weight: self.pos_weight,
            step_budget_ratio: self.step_budget_ratio,
            endpoint: self.endpoint,
            forward: self.forward,
        }
    }
}

/// Configuration for the conversion manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Requests that may wait in the queue before `convert` blocks.
    pub queue_depth: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { queue_depth: 64 }
    }
}

fn default_attention_exponent() -> f64 {
    0.3
}

fn default_window() -> usize {
    100
}

fn default_slope_bias() -> f64 {
    0.1
}

fn default_lookbehind() -> usize {
    20
}

fn default_lookahead() -> usize {
    40
}

fn default_peak_dropoff() -> f32 {
    5.0
}

fn default_epsilon() -> f32 {
    1e-10
}

fn default_reduction_factor() -> usize {
    1
}

fn default_pos_weight() -> f64 {
    1.0
}

fn default_step_budget_ratio() -> f64 {
    2.0
}
