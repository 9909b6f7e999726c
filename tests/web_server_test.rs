mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use brandme::web_server::{router, AppState, SessionStore};
use brandme::ChatError;
use common::StubGateway;
use serde_json::{json, Value};
use uuid::Uuid;

struct Harness {
    server: TestServer,
    store: Arc<SessionStore>,
}

fn crate_dir(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(name)
}

fn harness(stub: StubGateway) -> Harness {
    let store = Arc::new(SessionStore::new(stub.shared(), Duration::from_secs(600)));
    let state = AppState::new(crate_dir("templates"), store.clone());
    let server = TestServer::new(router(state, crate_dir("static"))).unwrap();
    Harness { server, store }
}

/// Pull (event, data) pairs out of a text/event-stream body.
fn sse_events(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut name = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    name = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data = Some(serde_json::from_str(v.trim()).unwrap());
                }
            }
            Some((name?, data?))
        })
        .collect()
}

async fn submit_profile(h: &Harness, id: Uuid) -> Value {
    let response = h
        .server
        .post(&format!("/api/sessions/{id}/profile"))
        .json(&json!({"interests": "고양이", "situation": "대학생"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    response.json()
}

#[tokio::test]
async fn test_index_renders_form_with_new_session() {
    let h = harness(StubGateway::new("냥냥이", &[]));

    let response = h.server.get("/").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let html = response.text();
    assert!(html.contains("제목학원 : 나를 브랜딩 하기"));
    assert!(html.contains("별명 만들기"));

    let marker = "data-session-id=\"";
    let start = html.find(marker).unwrap() + marker.len();
    let id: Uuid = html[start..start + 36].parse().unwrap();
    assert!(h.store.get(id).await.is_some());
}

#[tokio::test]
async fn test_static_assets_are_served() {
    let h = harness(StubGateway::new("냥냥이", &[]));

    assert_eq!(h.server.get("/static/app.js").await.status_code(), StatusCode::OK);
    assert_eq!(
        h.server.get("/static/missing.js").await.status_code(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_profile_moves_session_to_chatting() {
    let h = harness(StubGateway::new("냥냥이", &[]));
    let id = h.store.create().await;

    let body = submit_profile(&h, id).await;

    assert_eq!(body["message"], json!({"role": "assistant", "content": "냥냥이"}));
    assert_eq!(body["state"]["phase"], "chatting");
    assert_eq!(body["state"]["messages"].as_array().unwrap().len(), 1);

    let state: Value = h.server.get(&format!("/api/sessions/{id}")).await.json();
    assert_eq!(state["interests"], "고양이");
    assert_eq!(state["nickname"], Value::Null);
}

#[tokio::test]
async fn test_missing_field_is_unprocessable() {
    let h = harness(StubGateway::new("냥냥이", &[]));
    let id = h.store.create().await;

    let response = h
        .server
        .post(&format!("/api/sessions/{id}/profile"))
        .json(&json!({"interests": "", "situation": "대학생"}))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["kind"], "validation");

    let state: Value = h.server.get(&format!("/api/sessions/{id}")).await.json();
    assert_eq!(state["phase"], "collecting");
    assert_eq!(state["messages"], json!([]));
}

#[tokio::test]
async fn test_upstream_failure_is_bad_gateway() {
    let stub = StubGateway::new("", &[])
        .failing_nickname(ChatError::upstream(Some(500), "The server had an error"));
    let h = harness(stub);
    let id = h.store.create().await;

    let response = h
        .server
        .post(&format!("/api/sessions/{id}/profile"))
        .json(&json!({"interests": "고양이", "situation": "대학생"}))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["kind"], "upstream");
    assert!(body["message"].as_str().unwrap().contains("The server had an error"));
}

#[test_log::test(tokio::test)]
async fn test_message_streams_fragments_then_done() {
    let h = harness(StubGateway::new("냥냥이", &["반가", "워, ", "냥냥이!"]));
    let id = h.store.create().await;
    submit_profile(&h, id).await;

    let response = h
        .server
        .post(&format!("/api/sessions/{id}/messages"))
        .json(&json!({"text": "안녕"}))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let events = sse_events(&response.text());
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["fragment", "fragment", "fragment", "done"]);

    let streamed: String = events
        .iter()
        .filter(|(name, _)| name == "fragment")
        .map(|(_, data)| data["text"].as_str().unwrap())
        .collect();
    assert_eq!(streamed, "반가워, 냥냥이!");

    let done = &events[3].1;
    assert_eq!(done["message"]["content"], streamed);
    assert_eq!(
        done["state"]["messages"],
        json!([
            {"role": "assistant", "content": "냥냥이"},
            {"role": "user", "content": "안녕"},
            {"role": "assistant", "content": "반가워, 냥냥이!"}
        ])
    );
}

#[tokio::test]
async fn test_midstream_failure_sends_error_event_and_keeps_history() {
    let stub = StubGateway::new("냥냥이", &["부분"])
        .failing_midstream(ChatError::Network("connection reset".into()));
    let h = harness(stub);
    let id = h.store.create().await;
    submit_profile(&h, id).await;

    let response = h
        .server
        .post(&format!("/api/sessions/{id}/messages"))
        .json(&json!({"text": "안녕"}))
        .await;

    let events = sse_events(&response.text());
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, "fragment");
    assert_eq!(events[1].0, "error");
    assert_eq!(events[1].1["kind"], "network");

    let state: Value = h.server.get(&format!("/api/sessions/{id}")).await.json();
    assert_eq!(state["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_message_before_profile_is_conflict() {
    let h = harness(StubGateway::new("냥냥이", &["x"]));
    let id = h.store.create().await;

    let response = h
        .server
        .post(&format!("/api/sessions/{id}/messages"))
        .json(&json!({"text": "안녕"}))
        .await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["kind"], "phase");
}

#[tokio::test]
async fn test_reset_clears_session() {
    let h = harness(StubGateway::new("냥냥이", &[]));
    let id = h.store.create().await;
    submit_profile(&h, id).await;

    let response = h.server.post(&format!("/api/sessions/{id}/reset")).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let state: Value = response.json();
    assert_eq!(
        state,
        json!({
            "messages": [],
            "nickname": null,
            "interests": null,
            "situation": null,
            "phase": "collecting"
        })
    );
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let h = harness(StubGateway::new("냥냥이", &[]));
    let first = h.store.create().await;
    let second = h.store.create().await;

    submit_profile(&h, first).await;

    let state: Value = h.server.get(&format!("/api/sessions/{second}")).await.json();
    assert_eq!(state["phase"], "collecting");
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let h = harness(StubGateway::new("냥냥이", &[]));

    let response = h
        .server
        .get(&format!("/api/sessions/{}", Uuid::new_v4()))
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_malformed_json_body_is_json_error() {
    let h = harness(StubGateway::new("냥냥이", &[]));
    let id = h.store.create().await;

    let response = h
        .server
        .post(&format!("/api/sessions/{id}/profile"))
        .bytes("{\"interests\": ".into())
        .content_type("application/json")
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["kind"], "bad_request");
    assert!(!body["message"].as_str().unwrap().is_empty());

    let state: Value = h.server.get(&format!("/api/sessions/{id}")).await.json();
    assert_eq!(state["phase"], "collecting");
}

#[tokio::test]
async fn test_wrong_content_type_is_json_error() {
    let h = harness(StubGateway::new("냥냥이", &["x"]));
    let id = h.store.create().await;
    submit_profile(&h, id).await;

    let response = h
        .server
        .post(&format!("/api/sessions/{id}/messages"))
        .text("안녕")
        .await;

    assert_eq!(response.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body: Value = response.json();
    assert_eq!(body["kind"], "bad_request");

    let state: Value = h.server.get(&format!("/api/sessions/{id}")).await.json();
    assert_eq!(state["messages"].as_array().unwrap().len(), 1);
}
