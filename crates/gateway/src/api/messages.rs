use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::auth::middleware::AuthenticatedUser;
use crate::error::{ErrorCode, GatewayError};
use crate::store::{ConversationSummary, MessageRecord};

use super::ApiState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub receiver: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub conversation_id: i64,
    pub message_id: i64,
    pub timestamp: DateTime<Utc>,
    pub is_new_conversation: bool,
}

/// POST /api/messages — transactional send for clients without a live
/// connection. Unlike the gateway's fanout path, a store failure here is
/// surfaced to the caller.
pub async fn send_message(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    if body.message.trim().is_empty() {
        return Err(GatewayError::new(ErrorCode::ValidationFailed, "message body is empty"));
    }
    if body.receiver.trim().is_empty() {
        return Err(GatewayError::new(ErrorCode::ValidationFailed, "receiver is required"));
    }

    let (record, created) = state
        .store
        .store_direct_message(&user.username, &body.receiver, &body.message, Utc::now())
        .await
        .map_err(|error| {
            error!(error = ?error, sender = %user.username, "transactional send failed");
            GatewayError::from_code(ErrorCode::StoreUnavailable)
        })?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            conversation_id: record.conversation_id,
            message_id: record.id,
            timestamp: record.sent_at,
            is_new_conversation: created,
        }),
    ))
}

/// GET /api/conversations — the caller's conversations, most recent first.
pub async fn list_conversations(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<ConversationSummary>>, GatewayError> {
    state.store.conversations_for(&user.username).await.map(Json).map_err(|error| {
        error!(error = ?error, user = %user.username, "conversation list failed");
        GatewayError::from_code(ErrorCode::StoreUnavailable)
    })
}

/// GET /api/conversations/{id}/messages
pub async fn conversation_messages(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
) -> Result<Json<Vec<MessageRecord>>, GatewayError> {
    require_participant(&state, conversation_id, &user.username).await?;

    state.store.messages_in(conversation_id).await.map(Json).map_err(|error| {
        error!(error = ?error, conversation_id, "message list failed");
        GatewayError::from_code(ErrorCode::StoreUnavailable)
    })
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: u64,
}

/// POST /api/conversations/{id}/read — mark incoming messages as read.
pub async fn mark_read(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<i64>,
) -> Result<Json<MarkReadResponse>, GatewayError> {
    require_participant(&state, conversation_id, &user.username).await?;

    let updated = state.store.mark_read(conversation_id, &user.username).await.map_err(|error| {
        error!(error = ?error, conversation_id, "mark read failed");
        GatewayError::from_code(ErrorCode::StoreUnavailable)
    })?;

    Ok(Json(MarkReadResponse { updated }))
}

async fn require_participant(
    state: &ApiState,
    conversation_id: i64,
    username: &str,
) -> Result<(), GatewayError> {
    let conversation = state.store.conversation(conversation_id).await.map_err(|error| {
        error!(error = ?error, conversation_id, "conversation load failed");
        GatewayError::from_code(ErrorCode::StoreUnavailable)
    })?;

    match conversation {
        Some(summary) if summary.involves(username) => Ok(()),
        Some(_) => Err(GatewayError::new(ErrorCode::AuthForbidden, "not a conversation participant")),
        None => Err(GatewayError::from_code(ErrorCode::NotFound)),
    }
}
