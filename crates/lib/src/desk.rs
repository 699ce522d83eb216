//! Desk: topic selection, one conversation engine per selected topic, and forwarding of
//! finished transcripts to the dispatcher.
//!
//! Selecting a topic always stops the previous engine before the next one is built, so two
//! engines never race to hand off a transcript. Hand-offs are tagged with the selection
//! they belong to; a transcript for a topic that is no longer selected is dropped.

use crate::api::{ApiError, ResolveRequest, Topic, TopicApi};
use crate::conversation::{ConversationEngine, EngineError, OnConversationEnd};
use crate::widget::EventSource;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};

/// Engine type owned by the desk.
pub type DeskEngine = ConversationEngine<dyn EventSource>;

/// Builds the event source for a selected topic.
pub type SourceFactory = Arc<dyn Fn(&Topic) -> Arc<dyn EventSource> + Send + Sync>;

/// User-visible outcome of forwarding a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Resolved { topic: String },
    ResolveFailed { topic: String, reason: String },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::Resolved { topic } => {
                write!(f, "Successfully sent conversation for {}", topic)
            }
            Notice::ResolveFailed { topic, reason } => {
                write!(f, "Failed to send conversation for {}: {}", topic, reason)
            }
        }
    }
}

struct Selection {
    topic: Topic,
    engine: Arc<DeskEngine>,
    generation: u64,
}

pub struct Desk {
    api: Arc<dyn TopicApi>,
    factory: SourceFactory,
    topics: RwLock<Vec<Topic>>,
    active: Mutex<Option<Selection>>,
    generation: AtomicU64,
    ends_tx: mpsc::UnboundedSender<(u64, String)>,
    notices_tx: broadcast::Sender<Notice>,
}

impl Desk {
    /// Create a desk and its hand-off task. Must be called inside a Tokio runtime.
    pub fn new(api: Arc<dyn TopicApi>, factory: SourceFactory) -> Arc<Self> {
        let (ends_tx, ends_rx) = mpsc::unbounded_channel();
        let (notices_tx, _) = broadcast::channel(16);
        let desk = Arc::new(Self {
            api,
            factory,
            topics: RwLock::new(Vec::new()),
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
            ends_tx,
            notices_tx,
        });
        tokio::spawn(run_hand_offs(Arc::downgrade(&desk), ends_rx));
        desk
    }

    /// Fetch the topic list. Errors are surfaced once; nothing is retried.
    pub async fn load_topics(&self) -> Result<Vec<Topic>, ApiError> {
        let topics = self.api.list_topics().await?;
        *self.topics.write().await = topics.clone();
        Ok(topics)
    }

    pub async fn topics(&self) -> Vec<Topic> {
        self.topics.read().await.clone()
    }

    /// Loaded topic by name (case-insensitive).
    pub async fn find_topic(&self, name: &str) -> Option<Topic> {
        self.topics
            .read()
            .await
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name.trim()))
            .cloned()
    }

    /// Stop the current conversation (if any), then start one for `topic`.
    ///
    /// The engine is registered before it starts, so `deselect()` can cancel a start that is
    /// still fetching. A failed start leaves the errored engine selected for display.
    pub async fn select(&self, topic: Topic) -> Result<Arc<DeskEngine>, EngineError> {
        let engine = {
            let mut active = self.active.lock().await;
            if let Some(previous) = active.take() {
                log::info!("desk: leaving topic {}", previous.topic.name);
                previous.engine.stop().await;
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let ends_tx = self.ends_tx.clone();
            let on_end: OnConversationEnd = Arc::new(move |transcript: String| {
                let _ = ends_tx.send((generation, transcript));
            });
            let source = (self.factory)(&topic);
            let engine = Arc::new(ConversationEngine::new(topic.name.clone(), source, on_end));
            log::info!("desk: selected topic {}", topic.name);
            *active = Some(Selection {
                topic: topic.clone(),
                engine: engine.clone(),
                generation,
            });
            engine
        };
        engine.start(&topic.secure_storage_token).await?;
        Ok(engine)
    }

    /// Abandon the current conversation.
    pub async fn deselect(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            log::info!("desk: deselected topic {}", previous.topic.name);
            previous.engine.stop().await;
        }
    }

    pub async fn selected(&self) -> Option<(Topic, Arc<DeskEngine>)> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|s| (s.topic.clone(), s.engine.clone()))
    }

    /// Manual-entry flow: forward free text for a topic without a chat.
    pub async fn resolve_manual(&self, topic: &str, description: &str) -> Result<(), ApiError> {
        let request = ResolveRequest {
            topic_id: topic.to_string(),
            description: description.to_string(),
        };
        let result = self.api.resolve(request).await;
        self.notify(topic, &result);
        result
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices_tx.subscribe()
    }

    fn notify(&self, topic: &str, result: &Result<(), ApiError>) {
        let notice = match result {
            Ok(()) => Notice::Resolved {
                topic: topic.to_string(),
            },
            Err(e) => {
                log::error!("desk: failed to send conversation for {}: {}", topic, e);
                Notice::ResolveFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                }
            }
        };
        let _ = self.notices_tx.send(notice);
    }

    /// Forward a finished transcript and close the conversation it came from.
    async fn hand_off(&self, generation: u64, transcript: String) {
        let topic = match self.active.lock().await.as_ref() {
            Some(s) if s.generation == generation => s.topic.name.clone(),
            _ => {
                log::debug!("desk: dropping transcript for a topic no longer selected");
                return;
            }
        };
        let request = ResolveRequest {
            topic_id: topic.clone(),
            description: transcript,
        };
        let result = self.api.resolve(request).await;
        self.notify(&topic, &result);

        let finished = {
            let mut active = self.active.lock().await;
            match active.as_ref() {
                Some(s) if s.generation == generation => active.take(),
                _ => None,
            }
        };
        if let Some(s) = finished {
            s.engine.stop().await;
        }
    }
}

async fn run_hand_offs(desk: Weak<Desk>, mut ends_rx: mpsc::UnboundedReceiver<(u64, String)>) {
    while let Some((generation, transcript)) = ends_rx.recv().await {
        let Some(desk) = desk.upgrade() else {
            break;
        };
        desk.hand_off(generation, transcript).await;
    }
    log::debug!("desk: hand-off task stopped");
}
