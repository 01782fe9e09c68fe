//! Endpoint detection on a stored attention matrix.
//!
//! Reads a JSON file holding the attention rows of a finished decode run,
//! one row per decode step:
//!
//! ```json
//! {"attention": [[0.9, 0.1, 0.0], [0.2, 0.7, 0.1]]}
//! ```
//!
//! Runs banded DTW over it and prints a one-line JSON summary to stdout:
//!
//! ```json
//! {"steps":2,"source_len":3,"truncation":1,"path_len":2}
//! ```
//!
//! Exit code 0 on success, non-zero on error.

use anyhow::Context as _;
use clap::Parser;
use convs2s_rs::align::AttentionMatrix;
use convs2s_rs::align::dtw::detect_endpoint;
use convs2s_rs::config::EndpointConfig;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(
    name = "convs2s-endpoint",
    about = "Find where a ConvS2S decode run should be cut",
    long_about = "Run the DTW endpoint detector over an attention matrix stored as JSON.\n\
                  A JSON summary line is printed to stdout."
)]
struct Args {
    /// JSON file with an `attention` array of per-step rows.
    #[arg(long, short = 'i')]
    input: std::path::PathBuf,

    /// DTW band half-width.
    #[arg(long)]
    window: Option<usize>,

    /// Extra cost of a move along a single axis.
    #[arg(long)]
    slope_bias: Option<f64>,

    /// Exponent applied to attention before converting it to distance.
    #[arg(long)]
    exponent: Option<f64>,

    /// Also print the full alignment path.
    #[arg(long)]
    path: bool,
}

#[derive(Deserialize)]
struct AttentionFile {
    attention: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct Summary {
    steps: usize,
    source_len: usize,
    truncation: usize,
    path_len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<Vec<(usize, usize)>>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = EndpointConfig::default();
    if let Some(window) = args.window {
        config.window = window;
    }
    if let Some(slope_bias) = args.slope_bias {
        config.slope_bias = slope_bias;
    }
    if let Some(exponent) = args.exponent {
        if !exponent.is_finite() || exponent <= 0.0 {
            anyhow::bail!("exponent must be a positive number, got {exponent}");
        }
        config.attention_exponent = exponent;
    }

    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let file: AttentionFile = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;

    let source_len = file.attention.first().map_or(0, Vec::len);
    let attention = AttentionMatrix::from_columns(source_len, file.attention)
        .map_err(|e| anyhow::anyhow!("invalid attention matrix: {e}"))?;

    tracing::info!(
        steps = attention.steps(),
        source_len,
        window = config.window,
        slope_bias = config.slope_bias,
        "detecting endpoint"
    );

    let path = detect_endpoint(&attention, &config);
    if path.is_empty() {
        tracing::warn!("attention matrix is empty, nothing to align");
    }

    let summary = Summary {
        steps: attention.steps(),
        source_len,
        truncation: path.truncation_index(),
        path_len: path.len(),
        path: args.path.then(|| path.points().to_vec()),
    };
    println!("{}", serde_json::to_string(&summary)?);

    Ok(())
}
