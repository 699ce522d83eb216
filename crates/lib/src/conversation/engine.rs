//! Conversation engine: binds a [`Conversation`] to an [`EventSource`].
//!
//! Start-up runs config fetch, subscribe, and the initial snapshot in order; live events are
//! merged only after the snapshot has seeded the map. Every event is one turn under the
//! state lock, which is also where the completion callback runs, so `stop()` either
//! happens before a hand-off (and suppresses it) or after it has returned.

use crate::conversation::state::Conversation;
use crate::message::{now_millis, Message, RawEvent};
use crate::widget::{EventSource, SendPayload, SourceError};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Shown when the widget configuration cannot be fetched.
pub const CONFIG_ERROR_MESSAGE: &str = "Unable to load chatbot. Please try again later.";

/// Shown when the widget runtime fails to initialize.
pub const INIT_ERROR_MESSAGE: &str = "Error initializing chatbot. Please try again later.";

/// Completion callback: receives the transcript, at most once per engine.
pub type OnConversationEnd = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("widget configuration fetch failed: {0}")]
    ConfigFetch(#[source] SourceError),
    #[error("widget initialization failed: {0}")]
    Init(#[source] SourceError),
    #[error("conversation already started")]
    AlreadyStarted,
    #[error("conversation is not live yet")]
    NotReady,
    #[error("send failed: {0}")]
    Send(#[source] SourceError),
    #[error("conversation stopped")]
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Loading,
    Live,
    /// Start-up failed; carries the message to show the user.
    Errored(String),
    Stopped,
}

/// Read-only snapshot for a rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub topic_id: String,
    /// Displayable messages in timestamp order.
    pub messages: Vec<Message>,
    pub is_typing: bool,
    pub has_finished: bool,
    pub status: EngineStatus,
}

struct EngineState {
    conversation: Conversation,
    status: EngineStatus,
    stopped: bool,
    pump: Option<JoinHandle<()>>,
    /// Events delivered before the snapshot was seeded, with their receipt time.
    queued: Vec<(RawEvent, i64)>,
}

impl EngineState {
    fn view(&self) -> ConversationView {
        ConversationView {
            topic_id: self.conversation.topic_id().to_string(),
            messages: self.conversation.displayable(),
            is_typing: self.conversation.is_typing(),
            has_finished: self.conversation.has_finished(),
            status: self.status.clone(),
        }
    }
}

struct Shared {
    state: Mutex<EngineState>,
    on_end: OnConversationEnd,
    view_tx: watch::Sender<ConversationView>,
}

impl Shared {
    fn publish(&self, state: &EngineState) {
        self.view_tx.send_replace(state.view());
    }

    /// One event-handling turn. Returns false once the engine is stopped.
    ///
    /// Until the snapshot is seeded, events are queued and merged right after it.
    async fn handle_event(&self, raw: RawEvent) -> bool {
        let received_at = now_millis();
        let mut st = self.state.lock().await;
        if st.stopped {
            return false;
        }
        match st.status {
            EngineStatus::Live => {}
            EngineStatus::Idle | EngineStatus::Loading => {
                st.queued.push((raw, received_at));
                return true;
            }
            EngineStatus::Errored(_) | EngineStatus::Stopped => {
                log::debug!(
                    "conversation {}: dropping event, not live",
                    st.conversation.topic_id()
                );
                return true;
            }
        }
        self.merge(&mut st, &raw, received_at);
        self.publish(&st);
        true
    }

    /// Apply one event and run the completion callback if it finished the conversation.
    fn merge(&self, st: &mut EngineState, raw: &RawEvent, received_at: i64) {
        if let Some(transcript) = st.conversation.apply(raw, received_at) {
            log::info!(
                "conversation {}: finished with {} messages, handing off transcript",
                st.conversation.topic_id(),
                st.conversation.messages().len()
            );
            (self.on_end)(transcript);
        }
    }

    async fn fail(&self, message: &str) {
        let mut st = self.state.lock().await;
        if !st.stopped {
            st.status = EngineStatus::Errored(message.to_string());
            st.queued.clear();
            self.publish(&st);
        }
    }
}

/// One conversation with one event source. Create per topic selection; `stop()` to release.
pub struct ConversationEngine<S: EventSource + ?Sized> {
    topic_id: String,
    source: Arc<S>,
    shared: Arc<Shared>,
    stop_tx: watch::Sender<bool>,
}

impl<S: EventSource + ?Sized> ConversationEngine<S> {
    pub fn new(topic_id: impl Into<String>, source: Arc<S>, on_end: OnConversationEnd) -> Self {
        let topic_id = topic_id.into();
        let state = EngineState {
            conversation: Conversation::new(topic_id.clone()),
            status: EngineStatus::Idle,
            stopped: false,
            pump: None,
            queued: Vec::new(),
        };
        let (view_tx, _) = watch::channel(state.view());
        let (stop_tx, _) = watch::channel(false);
        Self {
            topic_id,
            source,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                on_end,
                view_tx,
            }),
            stop_tx,
        }
    }

    /// Fetch config, subscribe, load the snapshot, then merge live events.
    ///
    /// Each await is raced against `stop()`; a stopped start returns
    /// [`EngineError::Stopped`] without touching the message map.
    pub async fn start(&self, credentials: &str) -> Result<(), EngineError> {
        let topic = self.topic_id.clone();
        {
            let mut st = self.shared.state.lock().await;
            if st.stopped {
                return Err(EngineError::Stopped);
            }
            if st.status != EngineStatus::Idle {
                return Err(EngineError::AlreadyStarted);
            }
            st.status = EngineStatus::Loading;
            self.shared.publish(&st);
        }
        let mut stop_rx = self.stop_tx.subscribe();

        log::debug!("conversation {}: fetching widget config", topic);
        let config = tokio::select! {
            res = self.source.fetch_config(credentials) => res,
            _ = stop_signal(&mut stop_rx) => return Err(EngineError::Stopped),
        };
        let config = match config {
            Ok(c) => c,
            Err(e) => {
                log::error!("conversation {}: error fetching config: {}", topic, e);
                self.shared.fail(CONFIG_ERROR_MESSAGE).await;
                return Err(EngineError::ConfigFetch(e));
            }
        };

        let subscribed = tokio::select! {
            res = self.source.subscribe(&config) => res,
            _ = stop_signal(&mut stop_rx) => return Err(self.abandon()),
        };
        let events = match subscribed {
            Ok(rx) => rx,
            Err(e) => {
                log::error!("conversation {}: error subscribing to widget: {}", topic, e);
                self.shared.fail(INIT_ERROR_MESSAGE).await;
                return Err(EngineError::Init(e));
            }
        };

        let snapshot = tokio::select! {
            res = self.source.init(&config) => res,
            _ = stop_signal(&mut stop_rx) => return Err(self.abandon()),
        };
        let snapshot = match snapshot {
            Ok(s) => s,
            Err(e) => {
                log::error!("conversation {}: error initializing widget: {}", topic, e);
                self.shared.fail(INIT_ERROR_MESSAGE).await;
                self.source.destroy();
                return Err(EngineError::Init(e));
            }
        };

        let mut st = self.shared.state.lock().await;
        if st.stopped {
            drop(st);
            return Err(self.abandon());
        }
        st.conversation.seed(&snapshot, now_millis());
        for (raw, received_at) in std::mem::take(&mut st.queued) {
            self.shared.merge(&mut st, &raw, received_at);
        }
        st.status = EngineStatus::Live;
        st.pump = Some(spawn_pump(
            self.shared.clone(),
            events,
            self.stop_tx.subscribe(),
            topic.clone(),
        ));
        self.shared.publish(&st);
        log::info!(
            "conversation {}: live with {} seeded messages",
            topic,
            st.conversation.messages().len()
        );
        Ok(())
    }

    /// Subscription callback: merge one raw event. Ignored after `stop()`.
    pub async fn on_event(&self, raw: RawEvent) {
        self.shared.handle_event(raw).await;
    }

    /// Forward a user message. Blank input is a no-op and returns `Ok(false)`.
    pub async fn send(&self, text: &str) -> Result<bool, EngineError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        {
            let st = self.shared.state.lock().await;
            if st.stopped {
                return Err(EngineError::Stopped);
            }
            if st.status != EngineStatus::Live {
                return Err(EngineError::NotReady);
            }
        }
        self.source
            .send(SendPayload::new(text))
            .await
            .map_err(EngineError::Send)?;
        Ok(true)
    }

    /// Tear down: no callback fires once this returns. Idempotent.
    pub async fn stop(&self) {
        let pump = {
            let mut st = self.shared.state.lock().await;
            if st.stopped {
                return;
            }
            st.stopped = true;
            st.status = EngineStatus::Stopped;
            st.queued.clear();
            self.shared.publish(&st);
            st.pump.take()
        };
        self.stop_tx.send_replace(true);
        if let Some(pump) = pump {
            pump.abort();
        }
        self.source.destroy();
        log::info!("conversation {}: stopped", self.topic_id);
    }

    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    pub async fn view(&self) -> ConversationView {
        self.shared.state.lock().await.view()
    }

    /// Receiver updated after every state change.
    pub fn watch(&self) -> watch::Receiver<ConversationView> {
        self.shared.view_tx.subscribe()
    }

    /// Release anything a start step acquired after `stop()` already ran.
    fn abandon(&self) -> EngineError {
        self.source.destroy();
        EngineError::Stopped
    }
}

impl<S: EventSource + ?Sized> Drop for ConversationEngine<S> {
    /// Best-effort stop. The pump also exits on the stop signal, so teardown does not
    /// depend on getting the state lock here.
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
        match self.shared.state.try_lock() {
            Ok(mut st) => {
                if st.stopped {
                    return;
                }
                st.stopped = true;
                st.status = EngineStatus::Stopped;
                if let Some(pump) = st.pump.take() {
                    pump.abort();
                }
            }
            Err(_) => log::debug!("conversation {}: dropped during a turn", self.topic_id),
        }
        self.source.destroy();
    }
}

/// Resolves once `stop()` has been signalled or the engine is gone.
async fn stop_signal(rx: &mut watch::Receiver<bool>) {
    loop {
        let stopped = *rx.borrow_and_update();
        if stopped || rx.changed().await.is_err() {
            return;
        }
    }
}

fn spawn_pump(
    shared: Arc<Shared>,
    mut events: mpsc::Receiver<RawEvent>,
    mut stop_rx: watch::Receiver<bool>,
    topic: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let raw = tokio::select! {
                biased;
                _ = stop_signal(&mut stop_rx) => break,
                raw = events.recv() => match raw {
                    Some(raw) => raw,
                    None => break,
                },
            };
            let live = tokio::select! {
                biased;
                _ = stop_signal(&mut stop_rx) => false,
                live = shared.handle_event(raw) => live,
            };
            if !live {
                break;
            }
        }
        log::debug!("conversation {}: event stream ended", topic);
    })
}
