//! Transcript rendering: the text forwarded to the dispatcher when a chat ends.

use crate::message::MessageMap;

/// Render messages as `"{Author}: {text}"` lines ordered by timestamp.
///
/// Equal timestamps keep the order keys were first seen. Every message kind is included,
/// displayable or not. An empty map renders as an empty string.
pub fn serialize(messages: &MessageMap) -> String {
    messages
        .ordered()
        .into_iter()
        .map(|m| format!("{}: {}", m.author.label(), m.text))
        .collect::<Vec<_>>()
        .join("\n")
}
