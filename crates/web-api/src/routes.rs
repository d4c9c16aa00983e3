use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use validator::Validate;

use crate::{error::ApiError, state::AppState, ws_connection};

#[derive(Debug, Deserialize)]
struct WsQuery {
    user_id: Option<String>,
    room_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct BroadcastPayload {
    #[serde(rename = "type")]
    #[validate(length(min = 1))]
    event_type: String,
    #[serde(default)]
    data: Value,
    /// 消息作者；缺省或为空时按系统消息发送
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OnlineResponse {
    room_id: String,
    count: usize,
    users: Vec<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room_id}/online", get(online_users))
        .route("/rooms/{room_id}/broadcast", post(broadcast_to_room))
        .route(
            "/rooms/{room_id}/members/{user_id}",
            post(join_room).delete(leave_room),
        )
        .route("/connections/{user_id}", delete(disconnect))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// `GET /ws?user_id=..&room_id=..`
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let user_id = query
        .user_id
        .filter(|user_id| !user_id.is_empty())
        .ok_or_else(|| ApiError::bad_request("user_id is required"))?;
    if !state.hub.is_running() {
        return Err(ApiError::unavailable("hub is not running"));
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let room_id = query.room_id.unwrap_or_default();
    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| ws_connection::serve(socket, hub, user_id, room_id)))
}

async fn online_users(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Json<OnlineResponse> {
    let mut users: Vec<String> = state
        .hub
        .online_users(&room_id)
        .into_iter()
        .map(|client_id| client_id.to_string())
        .collect();
    users.sort();

    Json(OnlineResponse {
        count: users.len(),
        room_id,
        users,
    })
}

/// 服务端推送：消息持久化之后调用
async fn broadcast_to_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(payload): Json<BroadcastPayload>,
) -> Result<StatusCode, ApiError> {
    payload.validate()?;
    if !state.hub.is_running() {
        return Err(ApiError::unavailable("hub is not running"));
    }

    match payload.user_id.as_deref() {
        Some(user_id) if !user_id.is_empty() => {
            state
                .hub
                .broadcast_as(&room_id, user_id, payload.event_type, payload.data)
                .await
        }
        _ => {
            state
                .hub
                .broadcast_to_room(&room_id, payload.event_type, payload.data)
                .await
        }
    }
    Ok(StatusCode::ACCEPTED)
}

/// 把已连接的用户移入房间，并向新旧房间广播进出与在线人数
async fn join_room(
    State(state): State<AppState>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.hub.move_to_room(&user_id, &room_id, true).await?;
    Ok(StatusCode::ACCEPTED)
}

/// 用户仍在该房间时让其离开，并向房间广播 `leave` 与在线人数
async fn leave_room(
    State(state): State<AppState>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.hub.leave_room(&user_id, &room_id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn disconnect(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.hub.disconnect(&user_id).await?;
    Ok(StatusCode::ACCEPTED)
}
