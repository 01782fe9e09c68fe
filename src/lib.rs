//! ConvS2S voice conversion decoding in pure Rust.
//!
//! A candle-based implementation of the attention-driven autoregressive
//! decoder of a convolutional sequence-to-sequence voice conversion model.
//! The learned networks plug in behind traits; this crate owns the decode
//! loop, the alignment policies and endpoint detection.
//!
//! ## Architecture
//!
//! ```text
//! source mel → stack by rf → encoder ──► (K, V) context
//!                                            │
//!          ┌─────────────── step t ──────────┼───────────────┐
//!          │ prev frame + PE(t) → builder → query → attend ──┤
//!          │                                  policy: raw /   │
//!          │                                  diagonal /      │
//!          │                                  forward         │
//!          │ cat[attended, query] → regenerator → frame t ────┘
//!          └──────────────────────────────────────────────────
//!                                            ↓
//!              attention matrix → banded DTW → truncation index
//!                                            ↓
//!                            frames 0..truncation → unstack → mel
//! ```
//!
//! ## Modules
//!
//! - [`model`] — collaborator traits, key/value context, attention, step decoder
//! - [`align`] — alignment policies, forward peak tracker, DTW endpoint detector
//! - [`pipeline`] — the decode loop
//! - [`features`] — frame stacking by reduction factor
//! - [`converter`] — per-speaker spectrogram converter over segment lists
//! - [`manager`] — resident converters behind a request queue
//! - [`config`] — serde configuration with defaults

pub mod align;
pub mod config;
pub mod converter;
pub mod features;
pub mod manager;
pub mod model;
pub mod pipeline;

mod error;

pub use error::{Error, Result};
