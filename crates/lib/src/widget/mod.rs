//! Widget event sources.
//!
//! [`EventSource`] is the capability the conversation engine is written against. The
//! bridge source talks to a host running the real widget runtime; the memory source is
//! an in-process stand-in.

mod bridge;
mod memory;
mod protocol;
mod source;

pub use bridge::{BridgeSource, DEFAULT_CONFIG_BASE_URL};
pub use memory::{InitGate, MemoryEmitter, MemorySource};
pub use protocol::{BridgeFrame, EVENT_MESSAGE, METHOD_DESTROY, METHOD_INIT, METHOD_SEND};
pub use source::{fetch_widget_config, EventSource, SendPayload, SourceError, WidgetConfig};
