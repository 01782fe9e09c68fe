//! Conversion manager: keeps converters resident and queues requests.
//!
//! The manager owns a [`ConverterRegistry`] mapping target speakers to
//! loaded converters. Callers submit requests through a cloneable
//! [`ConversionManager`] handle; requests are processed sequentially on a
//! dedicated blocking thread. Each segment list is still converted
//! concurrently inside the converter.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use convs2s_rs::config::ManagerConfig;
//! use convs2s_rs::manager::{ConversionManager, ConverterRegistry};
//! # fn converter() -> Arc<dyn convs2s_rs::converter::VoiceConversion> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut registry = ConverterRegistry::new();
//!     registry.register(converter());
//!     let manager = ConversionManager::start(registry, ManagerConfig::default());
//!     let _mels = manager.convert(Vec::new(), "target").await.unwrap();
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use candle_core::Tensor;
use tokio::sync::{mpsc, oneshot};

use crate::config::ManagerConfig;
use crate::converter::VoiceConversion;
use crate::pipeline::CancelFlag;
use crate::{Error, Result};

/// Loaded converters by target speaker.
#[derive(Default, Clone)]
pub struct ConverterRegistry {
    converters: HashMap<String, Arc<dyn VoiceConversion>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `target` to `converter`, replacing any previous entry.
    pub fn insert(&mut self, target: impl Into<String>, converter: Arc<dyn VoiceConversion>) {
        self.converters.insert(target.into(), converter);
    }

    /// Route every speaker the converter knows to it.
    pub fn register(&mut self, converter: Arc<dyn VoiceConversion>) {
        for speaker in converter.speakers() {
            self.converters.insert(speaker.clone(), Arc::clone(&converter));
        }
    }

    pub fn get(&self, target: &str) -> Option<&Arc<dyn VoiceConversion>> {
        self.converters.get(target)
    }

    /// Registered targets, sorted.
    pub fn targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self.converters.keys().map(String::as_str).collect();
        targets.sort_unstable();
        targets
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

/// A submitted conversion request.
struct PendingRequest {
    segments: Vec<Tensor>,
    target: String,
    cancel: Option<CancelFlag>,
    reply: oneshot::Sender<Result<Vec<Tensor>>>,
}

/// Handle for submitting conversion requests to a running manager.
///
/// The worker shuts down once every handle is dropped.
#[derive(Clone)]
pub struct ConversionManager {
    tx: mpsc::Sender<PendingRequest>,
}

impl ConversionManager {
    /// Start the manager worker. Must be called inside a tokio runtime.
    pub fn start(registry: ConverterRegistry, config: ManagerConfig) -> Self {
        let (tx, rx) = mpsc::channel::<PendingRequest>(config.queue_depth.max(1));
        tracing::info!(
            targets = ?registry.targets(),
            queue_depth = config.queue_depth,
            "starting conversion manager"
        );
        tokio::task::spawn_blocking(move || run_manager(registry, rx));
        Self { tx }
    }

    /// Convert `segments` towards `target` and wait for the result.
    pub async fn convert(&self, segments: Vec<Tensor>, target: &str) -> Result<Vec<Tensor>> {
        self.submit(segments, target, None).await
    }

    /// Like [`convert`](Self::convert), but stops between decode steps once
    /// `cancel` is set.
    pub async fn convert_with_cancel(
        &self,
        segments: Vec<Tensor>,
        target: &str,
        cancel: CancelFlag,
    ) -> Result<Vec<Tensor>> {
        self.submit(segments, target, Some(cancel)).await
    }

    async fn submit(
        &self,
        segments: Vec<Tensor>,
        target: &str,
        cancel: Option<CancelFlag>,
    ) -> Result<Vec<Tensor>> {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<Vec<Tensor>>>();
        self.tx
            .send(PendingRequest {
                segments,
                target: target.to_string(),
                cancel,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Manager("manager has shut down".into()))?;

        reply_rx
            .await
            .map_err(|_| Error::Manager("manager dropped reply channel".into()))?
    }
}

/// The manager loop, run on a dedicated blocking thread.
fn run_manager(registry: ConverterRegistry, mut rx: mpsc::Receiver<PendingRequest>) {
    while let Some(request) = rx.blocking_recv() {
        let result = handle_request(&registry, &request);
        if let Err(error) = &result {
            tracing::warn!(speaker = %request.target, %error, "conversion failed");
        }
        // Ignore send errors: the caller may have gone away.
        let _ = request.reply.send(result);
    }
    tracing::info!("conversion manager shut down");
}

fn handle_request(registry: &ConverterRegistry, request: &PendingRequest) -> Result<Vec<Tensor>> {
    if request.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
        return Err(Error::Cancelled { step: 0 });
    }
    let converter = registry
        .get(&request.target)
        .ok_or_else(|| Error::UnknownSpeaker(request.target.clone()))?;
    converter.convert(&request.segments, &request.target, request.cancel.as_ref())
}
