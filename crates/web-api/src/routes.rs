use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use application::ConnectionSession;
use domain::{HistoryEntry, MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::bearer_user, error::ApiError, state::AppState, ws_connection};

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    before: Option<MessageId>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// 房间在线状态快照
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceSnapshot {
    online: Vec<UserId>,
    typing: Vec<UserId>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_upgrade))
        .route("/rooms/{room_id}/messages", get(get_history))
        .route("/rooms/{room_id}/presence", get(get_presence))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<RoomId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    bearer_user(&state, &headers).await?;

    let items = state
        .router
        .load_history(room_id, query.limit, query.before)
        .await?;

    Ok(Json(items))
}

async fn get_presence(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<RoomId>,
) -> Result<Json<PresenceSnapshot>, ApiError> {
    bearer_user(&state, &headers).await?;

    let presence = state.core.presence();
    let mut online: Vec<UserId> = presence.online_users(room_id).into_iter().collect();
    let mut typing: Vec<UserId> = presence.typing_users(room_id).into_iter().collect();
    online.sort();
    typing.sort();

    Ok(Json(PresenceSnapshot { online, typing }))
}

/// 升级前先完成认证：凭证无效时直接返回 401，不建立连接
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .ok_or_else(|| ApiError::unauthorized("Missing token"))?;

    let settings = state.core.settings();
    let inbound_capacity = settings.inbound_queue_capacity;
    let (transport, outbound) = mpsc::channel(settings.outbound_queue_capacity);

    let session = ConnectionSession::open(state.router.clone(), transport, &token).await?;
    let connection_id = session.connection_id();
    tracing::info!(connection_id = %connection_id, "WebSocket 连接已认证");

    let core = state.core.clone();
    Ok(ws
        .on_failed_upgrade(move |err| {
            tracing::warn!(connection_id = %connection_id, error = %err, "WebSocket 升级失败");
            core.registry().close(connection_id);
        })
        .on_upgrade(move |socket| {
            ws_connection::serve(socket, session, outbound, inbound_capacity)
        }))
}
