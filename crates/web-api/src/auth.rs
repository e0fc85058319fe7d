//! HTTP 接口的令牌提取
//!
//! HTTP 查询与 WebSocket 连接使用同一个用户目录校验凭证。

use axum::http::{header, HeaderMap};
use domain::UserId;

use crate::error::ApiError;
use crate::state::AppState;

/// 从 `Authorization: Bearer <token>` 中提取并验证用户
pub async fn bearer_user(state: &AppState, headers: &HeaderMap) -> Result<UserId, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))?;

    let user_id = state
        .core
        .user_directory()
        .authenticate(token.to_string())
        .await
        .map_err(|err| ApiError::unauthorized(err.to_string()))?;
    Ok(user_id)
}
