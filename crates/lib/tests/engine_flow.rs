//! Conversation engine driven by the in-memory event source: live stream ordering,
//! single-fire hand-off, and teardown while start-up is still pending.

use dispatch::conversation::{
    ConversationEngine, ConversationView, EngineError, EngineStatus, OnConversationEnd,
};
use dispatch::message::RawEvent;
use dispatch::widget::MemorySource;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

fn recorder() -> (OnConversationEnd, Arc<Mutex<Vec<String>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let cb: OnConversationEnd = Arc::new(move |t: String| sink.lock().unwrap().push(t));
    (cb, calls)
}

async fn wait_view(
    rx: &mut watch::Receiver<ConversationView>,
    pred: impl FnMut(&ConversationView) -> bool,
) -> ConversationView {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("view condition within 5s")
        .expect("engine alive")
        .clone()
}

#[tokio::test]
async fn typing_text_finish_hands_off_one_line() {
    let source = Arc::new(MemorySource::new());
    let emitter = source.emitter();
    let (cb, calls) = recorder();
    let engine = ConversationEngine::new("Billing", source.clone(), cb);
    let mut view = engine.watch();
    engine.start("token").await.expect("start");

    emitter.emit(json!({"type": "typing"})).await;
    wait_view(&mut view, |v| v.is_typing).await;

    emitter
        .emit(json!({"key": "m1", "samurai": -1, "type": "text", "message": "We will call you back.", "timestamp": 1000}))
        .await;
    emitter
        .emit(json!({"key": "m1", "samurai": -1, "type": "text", "message": "We will call you back.", "timestamp": 1000, "action": "finish"}))
        .await;
    let v = wait_view(&mut view, |v| v.has_finished).await;

    assert!(!v.is_typing);
    assert_eq!(v.messages.len(), 1);
    assert_eq!(
        *calls.lock().unwrap(),
        vec!["Bot: We will call you back.".to_string()]
    );
}

#[tokio::test]
async fn repeated_finish_events_fire_callback_once() {
    let source = Arc::new(MemorySource::new());
    let emitter = source.emitter();
    let (cb, calls) = recorder();
    let engine = ConversationEngine::new("t", source.clone(), cb);
    let mut view = engine.watch();
    engine.start("token").await.expect("start");

    for i in 0..3 {
        emitter
            .emit(json!({"key": format!("k{}", i), "timestamp": 10 + i, "message": "done", "action": "finish"}))
            .await;
    }
    emitter.emit(json!({"key": "last", "timestamp": 99})).await;
    wait_view(&mut view, |v| v.messages.iter().any(|m| m.key == "last")).await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], "User: done");
}

#[tokio::test]
async fn live_events_buffered_during_start_win_over_snapshot() {
    let source = Arc::new(MemorySource::new().with_snapshot(vec![
        RawEvent::new(json!({"key": "a", "samurai": 1, "message": "stale", "timestamp": 5})),
        RawEvent::new(json!({"key": "b", "samurai": 1, "message": "greeting", "timestamp": 1})),
    ]));
    let emitter = source.emitter();
    emitter
        .emit(json!({"key": "a", "samurai": 1, "message": "fresh", "timestamp": 5}))
        .await;

    let (cb, _) = recorder();
    let engine = ConversationEngine::new("t", source.clone(), cb);
    let mut view = engine.watch();
    engine.start("token").await.expect("start");

    let v = wait_view(&mut view, |v| {
        v.messages.iter().any(|m| m.key == "a" && m.text == "fresh")
    })
    .await;
    let texts: Vec<&str> = v.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["greeting", "fresh"]);
    assert_eq!(v.status, EngineStatus::Live);
}

#[tokio::test]
async fn stop_before_init_resolves_discards_snapshot() {
    let (source, gate) = MemorySource::new()
        .with_snapshot(vec![RawEvent::new(
            json!({"key": "s", "message": "snapshot", "action": "finish"}),
        )])
        .gated_init();
    let source = Arc::new(source);
    let emitter = source.emitter();
    let (cb, calls) = recorder();
    let engine = Arc::new(ConversationEngine::new("t", source.clone(), cb));

    let starting = engine.clone();
    let start = tokio::spawn(async move { starting.start("token").await });
    for _ in 0..100 {
        if source.config_fetches() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    engine.stop().await;
    gate.release();
    let result = start.await.expect("join");
    assert!(matches!(result, Err(EngineError::Stopped)));

    emitter
        .emit(json!({"key": "late", "action": "finish"}))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let v = engine.view().await;
    assert!(v.messages.is_empty());
    assert_eq!(v.status, EngineStatus::Stopped);
    assert!(calls.lock().unwrap().is_empty());
    assert!(source.is_destroyed());
}

#[tokio::test]
async fn stop_after_live_prevents_hand_off() {
    let source = Arc::new(MemorySource::new());
    let emitter = source.emitter();
    let (cb, calls) = recorder();
    let engine = ConversationEngine::new("t", source.clone(), cb);
    let mut view = engine.watch();
    engine.start("token").await.expect("start");

    emitter.emit(json!({"key": "1", "message": "hello", "timestamp": 1})).await;
    wait_view(&mut view, |v| v.messages.len() == 1).await;

    engine.stop().await;
    emitter
        .emit(json!({"key": "2", "message": "bye", "action": "finish"}))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(engine.view().await.messages.len(), 1);
    assert!(matches!(engine.send("hi").await, Err(EngineError::Stopped)));
}

#[tokio::test]
async fn callback_events_during_start_are_merged_after_snapshot() {
    let (source, gate) = MemorySource::new()
        .with_snapshot(vec![RawEvent::new(
            json!({"key": "a", "samurai": 1, "message": "stale", "timestamp": 5}),
        )])
        .gated_init();
    let source = Arc::new(source);
    let (cb, _) = recorder();
    let engine = Arc::new(ConversationEngine::new("t", source.clone(), cb));

    let starting = engine.clone();
    let start = tokio::spawn(async move { starting.start("token").await });
    for _ in 0..100 {
        if source.config_fetches() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    engine
        .on_event(RawEvent::new(
            json!({"key": "a", "samurai": 1, "message": "fresh", "timestamp": 5}),
        ))
        .await;
    engine
        .on_event(RawEvent::new(
            json!({"key": "live", "message": "live-only", "timestamp": 6}),
        ))
        .await;
    gate.release();
    start.await.expect("join").expect("start");

    let v = engine.view().await;
    let texts: Vec<&str> = v.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["fresh", "live-only"]);
    assert_eq!(v.status, EngineStatus::Live);
}
