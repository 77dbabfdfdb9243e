use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use quad_common::protocol::group::GroupMessageRecord;

use crate::auth::middleware::AuthenticatedUser;
use crate::error::{ErrorCode, GatewayError};

use super::ApiState;

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateGroupResponse {
    pub group_id: i64,
}

/// POST /api/groups — the creator becomes the first (admin) member.
pub async fn create_group(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    if body.name.trim().is_empty() {
        return Err(GatewayError::new(ErrorCode::ValidationFailed, "group name is required"));
    }

    let group_id =
        state.store.create_group(body.name.trim(), &user.username).await.map_err(|error| {
            error!(error = ?error, user = %user.username, "group create failed");
            GatewayError::from_code(ErrorCode::StoreUnavailable)
        })?;

    Ok((StatusCode::CREATED, Json(CreateGroupResponse { group_id })))
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub username: String,
}

/// POST /api/groups/{id}/members — members may invite others.
pub async fn add_member(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<i64>,
    Json(body): Json<AddMemberRequest>,
) -> Result<StatusCode, GatewayError> {
    require_member(&state, group_id, &user.username).await?;

    state.store.add_group_member(group_id, &body.username).await.map_err(|error| {
        error!(error = ?error, group_id, "group member add failed");
        GatewayError::from_code(ErrorCode::StoreUnavailable)
    })?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/groups/{id}/messages
pub async fn list_messages(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(group_id): Path<i64>,
) -> Result<Json<Vec<GroupMessageRecord>>, GatewayError> {
    require_member(&state, group_id, &user.username).await?;

    state.store.group_messages(group_id).await.map(Json).map_err(|error| {
        error!(error = ?error, group_id, "group message list failed");
        GatewayError::from_code(ErrorCode::StoreUnavailable)
    })
}

async fn require_member(
    state: &ApiState,
    group_id: i64,
    username: &str,
) -> Result<(), GatewayError> {
    let is_member = state.store.is_group_member(group_id, username).await.map_err(|error| {
        error!(error = ?error, group_id, "group membership check failed");
        GatewayError::from_code(ErrorCode::StoreUnavailable)
    })?;

    if is_member {
        Ok(())
    } else {
        Err(GatewayError::new(ErrorCode::AuthForbidden, "not a group member"))
    }
}
