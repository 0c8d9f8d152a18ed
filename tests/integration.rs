use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use motoextra_realtime::api::rest::router;
use motoextra_realtime::config::TimingConfig;
use motoextra_realtime::notify::{Notifier, PushPayload};
use motoextra_realtime::realtime::{
    ChannelEvent, ChannelKind, ChannelName, Filter, RealtimeBackend, Table,
};
use motoextra_realtime::state::AppState;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

const SHIFT: Uuid = Uuid::from_u128(0x51);
const OTHER_SHIFT: Uuid = Uuid::from_u128(0x52);
const RIDER: Uuid = Uuid::from_u128(0xA1);
const RESTAURANT: Uuid = Uuid::from_u128(0xB1);

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, PushPayload)>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, target: Uuid, payload: PushPayload) {
        self.sent.lock().unwrap().push((target, payload));
    }
}

struct Harness {
    app: axum::Router,
    state: Arc<AppState>,
    notifier: Arc<RecordingNotifier>,
}

fn setup() -> Harness {
    let notifier = Arc::new(RecordingNotifier::default());
    let state = Arc::new(AppState::new(
        1024,
        TimingConfig::default(),
        notifier.clone(),
    ));
    Harness {
        app: router(state.clone()),
        state,
        notifier,
    }
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn location_body(lat: f64, lng: f64) -> Value {
    json!({ "riderId": RIDER, "lat": lat, "lng": lng, "accuracy": 12.0 })
}

async fn post_message(h: &Harness, shift: Uuid, sender: Uuid, role: &str, text: &str) -> Value {
    let response = h
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/shifts/{shift}/messages"),
            json!({ "senderId": sender, "senderRole": role, "text": text }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn health_reports_counts_and_timers() {
    let h = setup();
    let response = h.app.oneshot(request("GET", "/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["live_locations"], 0);
    assert_eq!(body["chat_messages"], 0);
    assert_eq!(body["publish_floor_ms"], 8000);
    assert_eq!(body["heartbeat_interval_ms"], 10000);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let h = setup();
    let response = h.app.oneshot(request("GET", "/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("typing_signals_total"));
    assert!(body.contains("chat_messages_total"));
}

#[tokio::test]
async fn live_location_lifecycle() {
    let h = setup();
    let uri = format!("/shifts/{SHIFT}/location");

    let missing = h.app.clone().oneshot(request("GET", &uri)).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let first = h
        .app
        .clone()
        .oneshot(json_request("PUT", &uri, location_body(-23.55, -46.63)))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = h
        .app
        .clone()
        .oneshot(json_request("PUT", &uri, location_body(-23.56, -46.64)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(h.state.backend.row_count(Table::LocationSamples), 1);

    let current = h.app.clone().oneshot(request("GET", &uri)).await.unwrap();
    assert_eq!(current.status(), StatusCode::OK);
    let body = body_json(current).await;
    assert_eq!(body["lat"], -23.56);
    assert_eq!(body["riderId"], RIDER.to_string());

    let deleted = h
        .app
        .clone()
        .oneshot(request("DELETE", &format!("{uri}/{RIDER}")))
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let gone = h.app.oneshot(request("GET", &uri)).await.unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn out_of_range_location_is_rejected() {
    let h = setup();
    let response = h
        .app
        .oneshot(json_request(
            "PUT",
            &format!("/shifts/{SHIFT}/location"),
            location_body(91.0, 0.0),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("lat"));
}

#[tokio::test]
async fn rejected_write_maps_to_bad_gateway() {
    let h = setup();
    h.state.backend.set_reject_writes(true);

    let response = h
        .app
        .oneshot(json_request(
            "PUT",
            &format!("/shifts/{SHIFT}/location"),
            location_body(-23.55, -46.63),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn route_history_is_empty_for_unknown_shift() {
    let h = setup();
    let response = h
        .app
        .oneshot(request("GET", &format!("/shifts/{SHIFT}/route")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn blank_chat_message_is_rejected() {
    let h = setup();
    let response = h
        .app
        .oneshot(json_request(
            "POST",
            &format!("/shifts/{SHIFT}/messages"),
            json!({ "senderId": RIDER, "senderRole": "rider", "text": "   " }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_message_is_stored_trimmed_and_listed() {
    let h = setup();

    let stored = post_message(&h, SHIFT, RIDER, "rider", "  cheguei na porta  ").await;
    assert_eq!(stored["text"], "cheguei na porta");
    assert_eq!(stored["readAt"], Value::Null);
    assert!(stored["id"].as_str().is_some());

    post_message(&h, SHIFT, RESTAURANT, "restaurant", "pode subir").await;

    let response = h
        .app
        .oneshot(request("GET", &format!("/shifts/{SHIFT}/messages")))
        .await
        .unwrap();
    let list = body_json(response).await;
    let texts: Vec<&str> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|message| message["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["cheguei na porta", "pode subir"]);
}

#[tokio::test]
async fn recipient_is_notified_about_new_message() {
    let h = setup();
    let response = h
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/shifts/{SHIFT}/messages"),
            json!({
                "senderId": RESTAURANT,
                "senderRole": "restaurant",
                "text": "pedido pronto",
                "recipientId": RIDER
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let sent = h.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, RIDER);
    assert_eq!(sent[0].1.body, "pedido pronto");
    assert_eq!(sent[0].1.shift_id, Some(SHIFT));
}

#[tokio::test]
async fn mark_read_and_batched_unread_counts() {
    let h = setup();
    post_message(&h, SHIFT, RESTAURANT, "restaurant", "oi").await;
    post_message(&h, SHIFT, RESTAURANT, "restaurant", "tudo certo?").await;
    post_message(&h, SHIFT, RIDER, "rider", "sim").await;
    post_message(&h, OTHER_SHIFT, RESTAURANT, "restaurant", "outro extra").await;

    let empty_shift = Uuid::from_u128(0x53);
    let unread_uri = format!(
        "/messages/unread?reader_id={RIDER}&shift_ids={SHIFT},{OTHER_SHIFT},{empty_shift}"
    );

    let counts = body_json(h.app.clone().oneshot(request("GET", &unread_uri)).await.unwrap()).await;
    assert_eq!(counts[SHIFT.to_string()], 2);
    assert_eq!(counts[OTHER_SHIFT.to_string()], 1);
    assert_eq!(counts[empty_shift.to_string()], 0);

    let read_uri = format!("/shifts/{SHIFT}/messages/read");
    let first = h
        .app
        .clone()
        .oneshot(json_request("POST", &read_uri, json!({ "readerId": RIDER })))
        .await
        .unwrap();
    assert_eq!(body_json(first).await["updated"], 2);

    let again = h
        .app
        .clone()
        .oneshot(json_request("POST", &read_uri, json!({ "readerId": RIDER })))
        .await
        .unwrap();
    assert_eq!(body_json(again).await["updated"], 0);

    let counts = body_json(h.app.oneshot(request("GET", &unread_uri)).await.unwrap()).await;
    assert_eq!(counts[SHIFT.to_string()], 0);
    assert_eq!(counts[OTHER_SHIFT.to_string()], 1);
}

#[tokio::test]
async fn unread_with_invalid_shift_id_is_rejected() {
    let h = setup();
    let response = h
        .app
        .oneshot(request(
            "GET",
            &format!("/messages/unread?reader_id={RIDER}&shift_ids=not-a-uuid"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn typing_signal_reaches_channel_subscribers() {
    let h = setup();
    let channel = ChannelName::for_shift(ChannelKind::Typing, SHIFT);
    let mut subscription = h.state.backend.subscribe(&channel, Filter::new()).unwrap();

    let response = h
        .app
        .oneshot(json_request(
            "POST",
            &format!("/shifts/{SHIFT}/typing"),
            json!({ "senderId": RIDER }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    match subscription.next().await {
        Some(ChannelEvent::Broadcast { event, payload }) => {
            assert_eq!(event, "typing");
            assert_eq!(payload["senderId"], RIDER.to_string());
        }
        other => panic!("expected typing broadcast, got {other:?}"),
    }
}
