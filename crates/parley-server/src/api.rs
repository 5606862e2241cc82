//! REST handlers: accounts, rooms and message history.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use parley_core::store::{NewRoom, NewUser, Room, UserRecord};
use parley_core::{ChatMessage, Identity};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Public view of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub email: String,
    pub avatar: String,
}

impl From<UserRecord> for UserView {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            avatar: user.avatar,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub message: String,
    pub token: String,
    pub user: UserView,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Health check handler.
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// `POST /api/register`
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let (Some(username), Some(email), Some(password)) = (
        non_empty(req.username),
        non_empty(req.email),
        non_empty(req.password),
    ) else {
        return Err(ApiError::BadRequest("All fields are required".into()));
    };

    let password_hash = hash_password(password, state.config.auth.bcrypt_cost).await?;
    let user = state
        .hub
        .store()
        .create_user(NewUser {
            username,
            email,
            password_hash,
        })
        .await
        .inspect_err(|e| warn!(error = %e, "Registration rejected"))?;

    let token = state.hub.auth().issue_token(&user.id, &user.username)?;
    info!(user = %user.id, username = %user.username, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User created successfully".into(),
            token,
            user: user.into(),
        }),
    ))
}

/// `POST /api/login`
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let (Some(username), Some(password)) = (non_empty(req.username), non_empty(req.password))
    else {
        return Err(ApiError::BadRequest(
            "Username and password are required".into(),
        ));
    };

    let Some(user) = state.hub.store().find_user_by_username(&username).await? else {
        warn!(username = %username, "Login for unknown user");
        return Err(ApiError::Unauthorized("User not found".into()));
    };

    if !verify_password(password, user.password_hash.clone()).await? {
        warn!(username = %username, "Failed login attempt");
        return Err(ApiError::Unauthorized("Invalid password".into()));
    }

    let token = state.hub.auth().issue_token(&user.id, &user.username)?;
    info!(user = %user.id, "User logged in");

    Ok(Json(AuthResponse {
        message: "Login successful".into(),
        token,
        user: user.into(),
    }))
}

/// `GET /api/rooms`
pub async fn list_rooms(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let rooms = state.hub.store().list_rooms().await?;
    Ok(Json(json!({ "rooms": rooms })))
}

/// `POST /api/rooms`
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateRoomRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let Some(name) = non_empty(req.name) else {
        return Err(ApiError::BadRequest("Room name is required".into()));
    };

    let room: Room = state
        .hub
        .store()
        .create_room(NewRoom {
            name,
            description: req.description.unwrap_or_default(),
            created_by: identity.user_id,
            is_private: false,
        })
        .await?;

    info!(room = %room.id, name = %room.name, "Room created");
    Ok((StatusCode::CREATED, Json(json!({ "room": room }))))
}

/// `GET /api/rooms/:room_id/messages?limit=`
pub async fn room_messages(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(state.config.limits.max_history);
    let messages: Vec<ChatMessage> = state.hub.pipeline().history(&room_id, limit).await?;
    Ok(Json(json!({ "messages": messages })))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

async fn hash_password(password: String, cost: u32) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn verify_password(password: String, hash: String) -> ApiResult<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))
}
