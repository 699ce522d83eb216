//! Dispatch core library: topic chats with a hosted widget, the conversation state
//! engine, and transcript forwarding to the dispatcher.

pub mod api;
pub mod config;
pub mod conversation;
pub mod desk;
pub mod init;
pub mod message;
pub mod transcript;
pub mod widget;
