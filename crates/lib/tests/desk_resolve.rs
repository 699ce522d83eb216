//! Integration test: a fake dispatcher on a free port, the real HTTP client, and the desk
//! forwarding a finished chat transcript.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use dispatch::api::{DispatcherClient, NotificationMethod, ResolveRequest, Topic, TopicApi};
use dispatch::desk::{Desk, Notice, SourceFactory};
use dispatch::widget::{EventSource, MemorySource};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Backend {
    resolved: Arc<Mutex<Vec<ResolveRequest>>>,
    reject: bool,
}

async fn topics() -> Json<serde_json::Value> {
    Json(json!([
        {
            "id": 1,
            "name": "Billing",
            "description": "Invoices",
            "notification": {"id": 1, "method": "Email", "topic": 1},
            "secure_storage_token": "H-billing"
        },
        {
            "id": 2,
            "name": "Outage",
            "description": "Something is down",
            "notification": {"id": 2, "method": "Telegram", "topic": 2},
            "secure_storage_token": "H-outage"
        }
    ]))
}

async fn resolve(
    State(backend): State<Backend>,
    Json(body): Json<ResolveRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    if backend.reject {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"message": "No notifications found for this topic"})),
        );
    }
    backend.resolved.lock().unwrap().push(body);
    (StatusCode::OK, Json(json!({"message": "Notification sent"})))
}

async fn serve(backend: Backend) -> String {
    let app = Router::new()
        .route("/api/dispatcher/topics", get(topics))
        .route("/api/dispatcher/resolve/", post(resolve))
        .with_state(backend);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}/api", addr)
}

/// Factory that hands out one memory source per topic and remembers it.
fn memory_factory() -> (SourceFactory, Arc<Mutex<Vec<(String, Arc<MemorySource>)>>>) {
    let made = Arc::new(Mutex::new(Vec::new()));
    let record = made.clone();
    let factory: SourceFactory = Arc::new(move |topic: &Topic| {
        let source = Arc::new(MemorySource::new());
        record
            .lock()
            .unwrap()
            .push((topic.name.clone(), source.clone()));
        source as Arc<dyn EventSource>
    });
    (factory, made)
}

#[tokio::test]
async fn client_lists_topics_and_posts_resolution() {
    let backend = Backend::default();
    let base = serve(backend.clone()).await;
    let client = DispatcherClient::new(Some(base));

    let topics = client.list_topics().await.expect("topics");
    assert_eq!(topics.len(), 2);
    assert_eq!(topics[1].notification.method, NotificationMethod::Telegram);

    client
        .resolve(ResolveRequest {
            topic_id: "Billing".to_string(),
            description: "printer on fire".to_string(),
        })
        .await
        .expect("resolve");
    let resolved = backend.resolved.lock().unwrap();
    assert_eq!(resolved[0].description, "printer on fire");
}

#[tokio::test]
async fn rejected_resolution_is_an_api_error() {
    let base = serve(Backend {
        reject: true,
        ..Backend::default()
    })
    .await;
    let client = DispatcherClient::new(Some(base));
    let err = client
        .resolve(ResolveRequest {
            topic_id: "Nope".to_string(),
            description: "x".to_string(),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn finished_chat_is_forwarded_and_deselected() {
    let backend = Backend::default();
    let base = serve(backend.clone()).await;
    let (factory, made) = memory_factory();
    let desk = Desk::new(Arc::new(DispatcherClient::new(Some(base))), factory);
    let mut notices = desk.notices();

    desk.load_topics().await.expect("topics");
    let topic = desk.find_topic("billing").await.expect("topic");
    desk.select(topic).await.expect("select");

    let source = made.lock().unwrap()[0].1.clone();
    let emitter = source.emitter();
    emitter
        .emit(json!({"key": "1", "samurai": -1, "message": "What is wrong?", "timestamp": 10}))
        .await;
    emitter
        .emit(json!({"key": "2", "message": "Double charge", "timestamp": 20}))
        .await;
    emitter
        .emit(json!({"key": "3", "samurai": -1, "message": "Thanks, forwarded.", "timestamp": 30, "action": "finish"}))
        .await;

    let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv())
        .await
        .expect("notice within 5s")
        .expect("notice");
    assert_eq!(
        notice,
        Notice::Resolved {
            topic: "Billing".to_string()
        }
    );

    let resolved = backend.resolved.lock().unwrap().clone();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].topic_id, "Billing");
    assert_eq!(
        resolved[0].description,
        "Bot: What is wrong?\nUser: Double charge\nBot: Thanks, forwarded."
    );
    for _ in 0..100 {
        if desk.selected().await.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(desk.selected().await.is_none());
    assert!(source.is_destroyed());
}

#[tokio::test]
async fn switching_topics_stops_previous_engine_first() {
    let backend = Backend::default();
    let base = serve(backend.clone()).await;
    let (factory, made) = memory_factory();
    let desk = Desk::new(Arc::new(DispatcherClient::new(Some(base))), factory);
    desk.load_topics().await.expect("topics");

    let billing = desk.find_topic("Billing").await.expect("billing");
    let outage = desk.find_topic("Outage").await.expect("outage");
    desk.select(billing).await.expect("select billing");
    let old = made.lock().unwrap()[0].1.clone();
    desk.select(outage).await.expect("select outage");

    assert!(old.is_destroyed());
    let (selected, _) = desk.selected().await.expect("selected");
    assert_eq!(selected.name, "Outage");

    // a finish from the abandoned conversation never reaches the dispatcher
    old.emitter()
        .emit(json!({"key": "x", "message": "late", "action": "finish"}))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(backend.resolved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn manual_resolution_failure_emits_notice() {
    let base = serve(Backend {
        reject: true,
        ..Backend::default()
    })
    .await;
    let (factory, _) = memory_factory();
    let desk = Desk::new(Arc::new(DispatcherClient::new(Some(base))), factory);
    let mut notices = desk.notices();

    assert!(desk.resolve_manual("Billing", "typed by hand").await.is_err());
    match notices.recv().await.expect("notice") {
        Notice::ResolveFailed { topic, .. } => assert_eq!(topic, "Billing"),
        other => panic!("unexpected notice {:?}", other),
    }
}
