//! In-process event source: scripted snapshot, injectable live events, recorded sends.
//!
//! Used to drive the conversation engine without a widget runtime (tests, demos).

use crate::message::RawEvent;
use crate::widget::source::{EventSource, SendPayload, SourceError, WidgetConfig};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};

const EVENT_BUFFER: usize = 256;

/// Releases a pending `init` on a [`MemorySource`] built with [`MemorySource::gated_init`].
pub struct InitGate(oneshot::Sender<()>);

impl InitGate {
    pub fn release(self) {
        let _ = self.0.send(());
    }
}

/// Pushes live events into a [`MemorySource`].
#[derive(Clone)]
pub struct MemoryEmitter(mpsc::Sender<RawEvent>);

impl MemoryEmitter {
    /// Queue an event; returns false once the subscriber is gone.
    pub async fn emit(&self, raw: impl Into<RawEvent>) -> bool {
        self.0.send(raw.into()).await.is_ok()
    }
}

pub struct MemorySource {
    config: WidgetConfig,
    snapshot: Vec<RawEvent>,
    config_error: Option<String>,
    init_error: Option<String>,
    init_gate: Mutex<Option<oneshot::Receiver<()>>>,
    events_tx: mpsc::Sender<RawEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<RawEvent>>>,
    sent: Mutex<Vec<SendPayload>>,
    config_fetches: AtomicUsize,
    destroyed: AtomicBool,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            config: WidgetConfig(Value::Object(Default::default())),
            snapshot: Vec::new(),
            config_error: None,
            init_error: None,
            init_gate: Mutex::new(None),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            sent: Mutex::new(Vec::new()),
            config_fetches: AtomicUsize::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Events returned by `init`.
    pub fn with_snapshot(mut self, snapshot: Vec<RawEvent>) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn failing_config(mut self, error: impl Into<String>) -> Self {
        self.config_error = Some(error.into());
        self
    }

    pub fn failing_init(mut self, error: impl Into<String>) -> Self {
        self.init_error = Some(error.into());
        self
    }

    /// Hold `init` pending until the returned gate is released.
    pub fn gated_init(self) -> (Self, InitGate) {
        let (tx, rx) = oneshot::channel();
        *self.init_gate.lock().unwrap_or_else(|e| e.into_inner()) = Some(rx);
        (self, InitGate(tx))
    }

    pub fn emitter(&self) -> MemoryEmitter {
        MemoryEmitter(self.events_tx.clone())
    }

    /// Payloads forwarded through `send`, in order.
    pub fn sent(&self) -> Vec<SendPayload> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn config_fetches(&self) -> usize {
        self.config_fetches.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSource for MemorySource {
    async fn fetch_config(&self, _token: &str) -> Result<WidgetConfig, SourceError> {
        self.config_fetches.fetch_add(1, Ordering::SeqCst);
        match &self.config_error {
            Some(e) => Err(SourceError::Api(e.clone())),
            None => Ok(self.config.clone()),
        }
    }

    async fn subscribe(
        &self,
        _config: &WidgetConfig,
    ) -> Result<mpsc::Receiver<RawEvent>, SourceError> {
        self.events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| SourceError::Transport("already subscribed".to_string()))
    }

    async fn init(&self, _config: &WidgetConfig) -> Result<Vec<RawEvent>, SourceError> {
        let gate = self
            .init_gate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match &self.init_error {
            Some(e) => Err(SourceError::Api(e.clone())),
            None => Ok(self.snapshot.clone()),
        }
    }

    async fn send(&self, payload: SendPayload) -> Result<(), SourceError> {
        if self.is_destroyed() {
            return Err(SourceError::Closed);
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(payload);
        Ok(())
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}
