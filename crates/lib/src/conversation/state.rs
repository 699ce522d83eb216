//! Per-conversation reducer: typing flag, keyed message map, single-fire finish.

use crate::message::{is_displayable, normalize_all_at, normalize_at, Message, MessageMap, RawEvent};
use crate::transcript;

/// State of one topic conversation. Mutated one event at a time.
#[derive(Debug, Clone)]
pub struct Conversation {
    topic_id: String,
    messages: MessageMap,
    is_typing: bool,
    has_finished: bool,
}

impl Conversation {
    pub fn new(topic_id: impl Into<String>) -> Self {
        Self {
            topic_id: topic_id.into(),
            messages: MessageMap::new(),
            is_typing: false,
            has_finished: false,
        }
    }

    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    /// Replace the message map with an initial snapshot.
    pub fn seed<'a, I>(&mut self, snapshot: I, received_at: i64)
    where
        I: IntoIterator<Item = &'a RawEvent>,
    {
        self.messages = normalize_all_at(snapshot, received_at);
    }

    /// Apply one live event. Returns the transcript the first time a finish-marked
    /// event is applied, and `None` otherwise.
    ///
    /// Typing signals only raise the typing flag. Any other event clears it and is
    /// upserted by key; a finish is detected after the upsert so the transcript
    /// includes the finishing message.
    pub fn apply(&mut self, raw: &RawEvent, received_at: i64) -> Option<String> {
        if raw.is_typing() {
            self.is_typing = true;
            return None;
        }
        self.is_typing = false;
        let message = normalize_at(raw, received_at);
        if self.messages.upsert(message) {
            log::debug!("conversation {}: replaced message by key", self.topic_id);
        }
        if raw.is_finish() && !self.has_finished {
            self.has_finished = true;
            return Some(transcript::serialize(&self.messages));
        }
        None
    }

    pub fn messages(&self) -> &MessageMap {
        &self.messages
    }

    /// Messages the rendering layer shows, in timestamp order.
    pub fn displayable(&self) -> Vec<Message> {
        self.messages
            .ordered()
            .into_iter()
            .filter(|m| is_displayable(m))
            .cloned()
            .collect()
    }

    pub fn is_typing(&self) -> bool {
        self.is_typing
    }

    pub fn has_finished(&self) -> bool {
        self.has_finished
    }
}
