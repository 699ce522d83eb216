//! Event source capability: what the conversation engine needs from a widget runtime.

use crate::message::RawEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Opaque widget configuration, passed back to the runtime as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetConfig(pub Value);

/// A user-authored message forwarded to the runtime: `{ "message": text }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPayload {
    pub message: String,
}

impl SendPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("widget request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("widget api error: {0}")]
    Api(String),
    #[error("widget transport error: {0}")]
    Transport(String),
    #[error("widget connection closed")]
    Closed,
}

/// A widget runtime's message feed and command surface.
///
/// The engine calls `fetch_config`, then `subscribe`, then `init`, and merges live events
/// only after the snapshot from `init` has been applied. `destroy` releases the runtime
/// and may be called at any point, including while another call is pending.
#[async_trait]
pub trait EventSource: Send + Sync + 'static {
    /// Retrieve the widget configuration for a topic's credential.
    async fn fetch_config(&self, token: &str) -> Result<WidgetConfig, SourceError>;

    /// Open the live event stream. Events are delivered in runtime order.
    async fn subscribe(
        &self,
        config: &WidgetConfig,
    ) -> Result<mpsc::Receiver<RawEvent>, SourceError>;

    /// Request the initial snapshot of the conversation.
    async fn init(&self, config: &WidgetConfig) -> Result<Vec<RawEvent>, SourceError>;

    async fn send(&self, payload: SendPayload) -> Result<(), SourceError>;

    fn destroy(&self);
}

/// GET `{base_url}/{token}/index.json`, the hosted widget configuration.
pub async fn fetch_widget_config(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
) -> Result<WidgetConfig, SourceError> {
    let url = format!("{}/{}/index.json", base_url.trim_end_matches('/'), token.trim());
    let res = client.get(&url).send().await?;
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(SourceError::Api(format!(
            "config fetch failed: {} {}",
            status, body
        )));
    }
    let config: Value = res.json().await?;
    Ok(WidgetConfig(config))
}
