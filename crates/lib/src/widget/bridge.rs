//! Bridge source: widget configuration over HTTP, runtime commands and events over WebSocket.
//!
//! The widget runtime itself runs in a host process (the bridge). This source fetches the
//! hosted widget configuration, opens one WebSocket per conversation, correlates responses
//! to requests by id, and forwards `message` events to the subscriber in arrival order.

use crate::message::RawEvent;
use crate::widget::protocol::{BridgeFrame, EVENT_MESSAGE, METHOD_DESTROY, METHOD_INIT, METHOD_SEND};
use crate::widget::source::{fetch_widget_config, EventSource, SendPayload, SourceError, WidgetConfig};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// Default host of hosted widget configurations.
pub const DEFAULT_CONFIG_BASE_URL: &str = "https://landbot.online/v3";

const EVENT_BUFFER: usize = 256;

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, String>>>>>;

struct BridgeConn {
    outgoing: mpsc::UnboundedSender<String>,
    pending: Pending,
    reader: JoinHandle<()>,
    forwarder: JoinHandle<()>,
    /// Tells the writer to flush what is queued and close the socket.
    shutdown: oneshot::Sender<()>,
}

/// Event source backed by a widget-runtime bridge.
pub struct BridgeSource {
    http: reqwest::Client,
    config_base_url: String,
    bridge_url: String,
    conn: Mutex<Option<BridgeConn>>,
}

impl BridgeSource {
    pub fn new(config_base_url: Option<String>, bridge_url: impl Into<String>) -> Self {
        let config_base_url = config_base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_CONFIG_BASE_URL.to_string());
        Self {
            http: reqwest::Client::new(),
            config_base_url,
            bridge_url: bridge_url.into(),
            conn: Mutex::new(None),
        }
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Option<BridgeConn>> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a request frame and wait for its response payload.
    async fn request(&self, method: &str, params: Value) -> Result<Value, SourceError> {
        let (outgoing, pending) = {
            let g = self.lock_conn();
            let conn = g.as_ref().ok_or(SourceError::Closed)?;
            (conn.outgoing.clone(), conn.pending.clone())
        };
        let frame = BridgeFrame::request(method, params);
        let BridgeFrame::Req { ref id, .. } = frame else {
            return Err(SourceError::Transport("request frame expected".to_string()));
        };
        let (tx, rx) = oneshot::channel();
        pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), tx);
        if outgoing.send(frame.to_text()).is_err() {
            pending.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
            return Err(SourceError::Closed);
        }
        match rx.await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => Err(SourceError::Api(format!("{} failed: {}", method, e))),
            Err(_) => Err(SourceError::Closed),
        }
    }
}

#[async_trait]
impl EventSource for BridgeSource {
    async fn fetch_config(&self, token: &str) -> Result<WidgetConfig, SourceError> {
        fetch_widget_config(&self.http, &self.config_base_url, token).await
    }

    async fn subscribe(
        &self,
        _config: &WidgetConfig,
    ) -> Result<mpsc::Receiver<RawEvent>, SourceError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.bridge_url.as_str())
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        log::info!("widget bridge: connected to {}", self.bridge_url);
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        // The reader never waits on the subscriber: responses must be routed while
        // events pile up ahead of the `init` reply.
        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<RawEvent>();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = out_rx.recv() => match next {
                        Some(text) => {
                            if sink.send(Message::Text(text)).await.is_err() {
                                log::debug!("widget bridge: write failed, stopping writer");
                                return;
                            }
                        }
                        None => break,
                    },
                    _ = &mut shutdown_rx => {
                        while let Ok(text) = out_rx.try_recv() {
                            if sink.send(Message::Text(text)).await.is_err() {
                                return;
                            }
                        }
                        break;
                    }
                }
            }
            let _ = sink.close().await;
        });

        let forwarder = tokio::spawn(async move {
            while let Some(raw) = inbox_rx.recv().await {
                if events_tx.send(raw).await.is_err() {
                    log::debug!("widget bridge: subscriber gone, stopping forwarder");
                    return;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        log::debug!("widget bridge: read error: {}", e);
                        break;
                    }
                };
                let frame: BridgeFrame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        log::debug!("widget bridge: ignoring unparseable frame: {}", e);
                        continue;
                    }
                };
                match frame {
                    BridgeFrame::Res {
                        id,
                        ok,
                        payload,
                        error,
                    } => {
                        let waiter = reader_pending
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .remove(&id);
                        if let Some(tx) = waiter {
                            let result = if ok {
                                Ok(payload.unwrap_or(Value::Null))
                            } else {
                                Err(error.unwrap_or_else(|| "unknown error".to_string()))
                            };
                            let _ = tx.send(result);
                        }
                    }
                    BridgeFrame::Event { event, payload } if event == EVENT_MESSAGE => {
                        if inbox_tx.send(RawEvent::new(payload)).is_err() {
                            log::debug!("widget bridge: forwarder gone, stopping reader");
                            break;
                        }
                    }
                    BridgeFrame::Event { event, .. } => {
                        log::debug!("widget bridge: ignoring event {}", event);
                    }
                    BridgeFrame::Req { method, .. } => {
                        log::debug!("widget bridge: ignoring request {}", method);
                    }
                }
            }
            reader_pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
            log::info!("widget bridge: connection closed");
        });

        let previous = self.lock_conn().replace(BridgeConn {
            outgoing: out_tx,
            pending,
            reader,
            forwarder,
            shutdown: shutdown_tx,
        });
        if let Some(old) = previous {
            old.reader.abort();
            old.forwarder.abort();
            let _ = old.shutdown.send(());
        }
        Ok(events_rx)
    }

    async fn init(&self, config: &WidgetConfig) -> Result<Vec<RawEvent>, SourceError> {
        let payload = self.request(METHOD_INIT, json!({ "config": config })).await?;
        Ok(payload
            .get("messages")
            .map(RawEvent::list_from)
            .unwrap_or_default())
    }

    async fn send(&self, payload: SendPayload) -> Result<(), SourceError> {
        let params =
            serde_json::to_value(&payload).map_err(|e| SourceError::Transport(e.to_string()))?;
        self.request(METHOD_SEND, params).await.map(|_| ())
    }

    fn destroy(&self) {
        let Some(conn) = self.lock_conn().take() else {
            return;
        };
        let _ = conn
            .outgoing
            .send(BridgeFrame::request(METHOD_DESTROY, Value::Null).to_text());
        let _ = conn.shutdown.send(());
        conn.reader.abort();
        conn.forwarder.abort();
        conn.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        log::debug!("widget bridge: destroyed");
    }
}
