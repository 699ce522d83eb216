//! Dispatcher API client: list topics and forward transcripts for resolution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// How a topic's resolutions are delivered. Unknown methods are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationMethod {
    Email,
    Slack,
    Telegram,
    Other(String),
}

impl From<String> for NotificationMethod {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Email" => NotificationMethod::Email,
            "Slack" => NotificationMethod::Slack,
            "Telegram" => NotificationMethod::Telegram,
            _ => NotificationMethod::Other(s),
        }
    }
}

impl From<NotificationMethod> for String {
    fn from(m: NotificationMethod) -> Self {
        match m {
            NotificationMethod::Email => "Email".to_string(),
            NotificationMethod::Slack => "Slack".to_string(),
            NotificationMethod::Telegram => "Telegram".to_string(),
            NotificationMethod::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub method: NotificationMethod,
}

/// A selectable subject with its notification channel and widget credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub notification: Notification,
    /// Credential used to fetch the topic's widget configuration.
    #[serde(default)]
    pub secure_storage_token: String,
}

/// Body of `POST /dispatcher/resolve/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub topic_id: String,
    pub description: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("dispatcher request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("dispatcher api error: {0}")]
    Api(String),
}

/// Topic listing and resolution, as consumed by the desk.
#[async_trait]
pub trait TopicApi: Send + Sync {
    async fn list_topics(&self) -> Result<Vec<Topic>, ApiError>;
    async fn resolve(&self, request: ResolveRequest) -> Result<(), ApiError>;
}

/// Client for the dispatcher HTTP API.
#[derive(Clone)]
pub struct DispatcherClient {
    base_url: String,
    client: reqwest::Client,
}

impl DispatcherClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TopicApi for DispatcherClient {
    /// GET /dispatcher/topics
    async fn list_topics(&self) -> Result<Vec<Topic>, ApiError> {
        let url = format!("{}/dispatcher/topics", self.base_url);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Api(format!("{} {}", status, body)));
        }
        let topics: Vec<Topic> = res.json().await?;
        log::debug!("dispatcher: fetched {} topics", topics.len());
        Ok(topics)
    }

    /// POST /dispatcher/resolve/ with `{ topic_id, description }`.
    async fn resolve(&self, request: ResolveRequest) -> Result<(), ApiError> {
        let url = format!("{}/dispatcher/resolve/", self.base_url);
        let res = self.client.post(&url).json(&request).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Api(format!("{} {}", status, body)));
        }
        log::info!("dispatcher: resolved topic {}", request.topic_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_parses_wire_shape() {
        let json = r#"[{
            "id": 3,
            "name": "Billing",
            "description": "Invoices and refunds",
            "notification": {"id": 1, "method": "Slack", "topic": 3},
            "secure_storage_token": "H-123"
        }]"#;
        let topics: Vec<Topic> = serde_json::from_str(json).expect("parse");
        assert_eq!(topics[0].name, "Billing");
        assert_eq!(topics[0].notification.method, NotificationMethod::Slack);
        assert_eq!(topics[0].secure_storage_token, "H-123");
    }

    #[test]
    fn unknown_notification_method_is_kept() {
        let n: Notification = serde_json::from_str(r#"{"method": "Pager"}"#).expect("parse");
        assert_eq!(n.method, NotificationMethod::Other("Pager".to_string()));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let c = DispatcherClient::new(Some("http://host/api/".to_string()));
        assert_eq!(c.base_url(), "http://host/api");
        assert_eq!(DispatcherClient::new(None).base_url(), DEFAULT_BASE_URL);
    }
}
