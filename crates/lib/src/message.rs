//! Canonical chat messages and normalization of raw widget events.
//!
//! The widget runtime emits loosely shaped JSON records. Every record is turned into a
//! [`Message`] by [`normalize_at`]; missing fields fall back to defaults so normalization
//! never fails. Messages are kept in a [`MessageMap`], keyed by the widget's message key.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Field whose presence marks a message as bot-authored. Its value is never inspected.
pub const BOT_MARKER: &str = "samurai";

/// Raw event `type` for the typing indicator.
pub const TYPING_EVENT: &str = "typing";

/// Raw event `action` that ends the conversation.
pub const FINISH_ACTION: &str = "finish";

/// Substring of `extra.id` that marks a failed message.
const ERROR_MARKER: &str = "error";

/// Kinds shown by the rendering layer (see [`is_displayable`]).
const DISPLAYABLE_KINDS: [&str; 3] = ["text", "dialog", "image"];

/// An untrusted event record as delivered by the widget runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent(Value);

impl RawEvent {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Field lookup; non-object events have no fields.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.as_object().and_then(|o| o.get(field))
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.as_object().is_some_and(|o| o.contains_key(field))
    }

    pub fn event_type(&self) -> Option<&str> {
        self.get("type").and_then(Value::as_str)
    }

    pub fn action(&self) -> Option<&str> {
        self.get("action").and_then(Value::as_str)
    }

    /// True for the "bot is typing" signal, which carries no message.
    pub fn is_typing(&self) -> bool {
        self.event_type() == Some(TYPING_EVENT)
    }

    /// True when the runtime considers the conversation complete.
    pub fn is_finish(&self) -> bool {
        self.action() == Some(FINISH_ACTION)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Events of an initial snapshot: either a JSON array of events or an object whose
    /// values are events (the runtime's keyed `messages` store). Order is preserved.
    pub fn list_from(value: &Value) -> Vec<RawEvent> {
        match value {
            Value::Array(items) => items.iter().cloned().map(RawEvent).collect(),
            Value::Object(map) => map.values().cloned().map(RawEvent).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<Value> for RawEvent {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    Bot,
    User,
}

impl Author {
    /// Label used in transcripts.
    pub fn label(self) -> &'static str {
        match self {
            Author::Bot => "Bot",
            Author::User => "User",
        }
    }
}

/// Message kind from the raw `type` field. Unknown kinds are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    Text,
    Dialog,
    Image,
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Dialog => "dialog",
            MessageKind::Image => "image",
            MessageKind::Other(s) => s,
        }
    }
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "text" => MessageKind::Text,
            "dialog" => MessageKind::Dialog,
            "image" => MessageKind::Image,
            _ => MessageKind::Other(s),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A normalized message, owned by the conversation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub key: String,
    pub text: String,
    pub buttons: Vec<String>,
    pub author: Author,
    /// Epoch milliseconds; only used for ordering.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub success: bool,
}

/// Normalize with the current wall clock as the receipt time.
pub fn normalize(raw: &RawEvent) -> Message {
    normalize_at(raw, now_millis())
}

/// Normalize a raw event. `received_at` (epoch ms) stands in for a missing timestamp.
///
/// Author is derived from the presence of [`BOT_MARKER`] alone: any event carrying that
/// key, whatever its value, is a bot message; everything else is the user's.
pub fn normalize_at(raw: &RawEvent, received_at: i64) -> Message {
    let key = match raw.get("key") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    let text = raw
        .get("title")
        .and_then(truthy_text)
        .or_else(|| raw.get("message").and_then(truthy_text))
        .unwrap_or_default();
    let buttons = match raw.get("buttons") {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        _ => Vec::new(),
    };
    let author = if raw.has(BOT_MARKER) {
        Author::Bot
    } else {
        Author::User
    };
    let timestamp = raw
        .get("timestamp")
        .and_then(parse_timestamp)
        .unwrap_or(received_at);
    let kind = raw
        .event_type()
        .filter(|t| !t.is_empty())
        .map(|t| MessageKind::from(t.to_string()))
        .unwrap_or(MessageKind::Text);
    let success = match raw.get("extra").and_then(|e| e.get("id")) {
        None => true,
        Some(Value::String(id)) => !id.contains(ERROR_MARKER),
        Some(other) => !other.to_string().contains(ERROR_MARKER),
    };
    Message {
        key,
        text,
        buttons,
        author,
        timestamp,
        kind,
        success,
    }
}

/// Bulk normalization for an initial snapshot; later events win on key collision.
pub fn normalize_all<'a, I>(events: I) -> MessageMap
where
    I: IntoIterator<Item = &'a RawEvent>,
{
    normalize_all_at(events, now_millis())
}

pub fn normalize_all_at<'a, I>(events: I, received_at: i64) -> MessageMap
where
    I: IntoIterator<Item = &'a RawEvent>,
{
    let mut map = MessageMap::new();
    for raw in events {
        map.upsert(normalize_at(raw, received_at));
    }
    map
}

/// True when the rendering layer should show the message.
pub fn is_displayable(message: &Message) -> bool {
    DISPLAYABLE_KINDS.contains(&message.kind.as_str())
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Non-empty text of a scalar, treating empty strings, zero, false and null as absent.
fn truthy_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Epoch ms from a number or numeric string. Zero counts as missing.
fn parse_timestamp(v: &Value) -> Option<i64> {
    let ts = match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }?;
    (ts != 0).then_some(ts)
}

/// Messages keyed by message key, remembering the order keys were first seen.
///
/// Upserting an existing key replaces the message in place, so the first-encounter
/// position is the tie-break when timestamps are equal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMap {
    entries: Vec<Message>,
    index: HashMap<String, usize>,
}

impl MessageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by key. Returns true when an existing message was replaced.
    pub fn upsert(&mut self, message: Message) -> bool {
        if let Some(&i) = self.index.get(&message.key) {
            self.entries[i] = message;
            true
        } else {
            self.index.insert(message.key.clone(), self.entries.len());
            self.entries.push(message);
            false
        }
    }

    pub fn get(&self, key: &str) -> Option<&Message> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Messages in first-encounter order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter()
    }

    /// Messages by ascending timestamp; equal timestamps keep first-encounter order.
    pub fn ordered(&self) -> Vec<&Message> {
        let mut out: Vec<&Message> = self.entries.iter().collect();
        out.sort_by_key(|m| m.timestamp);
        out
    }
}

impl FromIterator<Message> for MessageMap {
    fn from_iter<T: IntoIterator<Item = Message>>(iter: T) -> Self {
        let mut map = MessageMap::new();
        for m in iter {
            map.upsert(m);
        }
        map
    }
}
