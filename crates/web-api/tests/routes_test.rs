mod support;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use config::HubConfig;
use serde_json::{json, Value};
use tower::ServiceExt;

use support::build_router;

async fn send_request(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = serde_json::from_slice(&body_bytes).unwrap_or(json!({}));
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_check() {
    let (app, _hub) = build_router(HubConfig::default());
    let (status, _) = send_request(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn websocket_without_user_is_rejected_before_upgrade() {
    let (app, _hub) = build_router(HubConfig::default());

    let (status, body) = send_request(&app, get("/ws?room_id=R1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, _) = send_request(&app, get("/ws?user_id=&room_id=R1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 有身份但不是升级请求
    let (status, _) = send_request(&app, get("/ws?user_id=alice&room_id=R1")).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn online_users_of_empty_room() {
    let (app, _hub) = build_router(HubConfig::default());
    let (status, body) = send_request(&app, get("/api/v1/rooms/quiet/online")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"room_id": "quiet", "count": 0, "users": []}));
}

#[tokio::test]
async fn broadcast_requires_event_type() {
    let (app, _hub) = build_router(HubConfig::default());

    let (status, body) = send_request(
        &app,
        post_json("/api/v1/rooms/R1/broadcast", json!({"type": "", "data": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ARGUMENT");

    let (status, _) = send_request(
        &app,
        post_json("/api/v1/rooms/R1/broadcast", json!({"type": "system"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn moving_unknown_user_is_accepted() {
    let (app, hub) = build_router(HubConfig::default());
    let (status, _) = send_request(&app, post_json("/api/v1/rooms/R1/members/ghost", json!({}))).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    hub.flush().await.expect("flush");
    assert_eq!(hub.online_count("R1"), 0);
}

#[tokio::test]
async fn leaving_a_room_is_accepted_until_stopped() {
    let (app, hub) = build_router(HubConfig::default());
    let delete = |uri: &str| {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };

    let (status, _) = send_request(&app, delete("/api/v1/rooms/R1/members/ghost")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    hub.flush().await.expect("flush");
    assert_eq!(hub.online_count("R1"), 0);

    hub.stop().await.expect("stop");
    let (status, body) = send_request(&app, delete("/api/v1/rooms/R1/members/ghost")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "HUB_CLOSED");
}

#[tokio::test]
async fn stopped_hub_reports_unavailable() {
    let (app, hub) = build_router(HubConfig::default());
    hub.stop().await.expect("stop");

    let (status, body) = send_request(
        &app,
        post_json("/api/v1/rooms/R1/broadcast", json!({"type": "message"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "HUB_CLOSED");

    let (status, body) = send_request(&app, post_json("/api/v1/rooms/R1/members/alice", json!({}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "HUB_CLOSED");

    let (status, _) = send_request(&app, get("/ws?user_id=alice&room_id=R1")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
