//! Conversation state engine.
//!
//! [`Conversation`] is the synchronous reducer (typing flag, keyed messages, single-fire
//! finish). [`ConversationEngine`] drives it from an event source and owns the
//! subscription for the lifetime of one topic selection.

mod engine;
mod state;

pub use engine::{
    ConversationEngine, ConversationView, EngineError, EngineStatus, OnConversationEnd,
    CONFIG_ERROR_MESSAGE, INIT_ERROR_MESSAGE,
};
pub use state::Conversation;
