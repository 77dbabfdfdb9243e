use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::Deserialize;
use tracing::error;

use crate::auth::middleware::AuthenticatedUser;
use crate::error::{ErrorCode, GatewayError};
use crate::presence::{self, NearbyUser};

use super::ApiState;

#[derive(Debug, Deserialize)]
pub struct UpdateLocationRequest {
    pub latitude: f64,
    pub longitude: f64,
}

/// POST /api/location — record the caller's position; feeds both presence
/// and the nearby query.
pub async fn update_location(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<UpdateLocationRequest>,
) -> Result<StatusCode, GatewayError> {
    if !(-90.0..=90.0).contains(&body.latitude) || !(-180.0..=180.0).contains(&body.longitude) {
        return Err(GatewayError::new(ErrorCode::ValidationFailed, "coordinates out of range"));
    }

    state
        .store
        .update_location(&user.username, body.latitude, body.longitude)
        .await
        .map_err(|error| {
            error!(error = ?error, user = %user.username, "location update failed");
            GatewayError::from_code(ErrorCode::StoreUnavailable)
        })?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/users/nearby
pub async fn nearby_users(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<NearbyUser>>, GatewayError> {
    presence::nearby_users(&state.store, &user.username).await.map(Json).map_err(|error| {
        error!(error = ?error, user = %user.username, "nearby lookup failed");
        GatewayError::from_code(ErrorCode::StoreUnavailable)
    })
}
