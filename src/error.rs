//! Error types for convs2s-rs.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Two tensors that must agree on a channel/length axis do not.
    #[error("{what}: expected {expected}, got {actual}")]
    ChannelMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The encoder produced a context with no source positions.
    #[error("context has zero source length")]
    EmptyContext,

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),

    /// Target speaker not present in the speaker list or registry.
    #[error("unknown speaker: {0}")]
    UnknownSpeaker(String),

    /// Decoding was cancelled between steps.
    #[error("decode cancelled at step {step}")]
    Cancelled { step: usize },

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Conversion manager failure (worker gone, reply dropped).
    #[error("manager: {0}")]
    Manager(String),
}
