// Collaborator HTTP surface: request/response plumbing over the store for
// clients without a live WebSocket connection.

pub mod groups;
pub mod messages;
pub mod nearby;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Extension, Router,
};
use tracing::debug;

use crate::auth::{
    jwt::AccessTokenService,
    middleware::{require_bearer_auth, AuthenticatedUser},
};
use crate::store::ChatStore;

const TAB_ID_HEADER: &str = "x-tab-id";

#[derive(Clone)]
pub struct ApiState {
    pub store: ChatStore,
}

pub fn router(token_service: Arc<AccessTokenService>, store: ChatStore) -> Router {
    let state = ApiState { store };

    Router::new()
        .route("/api/messages", post(messages::send_message))
        .route("/api/conversations", get(messages::list_conversations))
        .route("/api/conversations/{conversation_id}/messages", get(messages::conversation_messages))
        .route("/api/conversations/{conversation_id}/read", post(messages::mark_read))
        .route("/api/groups", post(groups::create_group))
        .route("/api/groups/{group_id}/members", post(groups::add_member))
        .route("/api/groups/{group_id}/messages", get(groups::list_messages))
        .route("/api/location", post(nearby::update_location))
        .route("/api/users/nearby", get(nearby::nearby_users))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_tab_session))
        .route_layer(middleware::from_fn_with_state(token_service, require_bearer_auth))
        .with_state(state)
}

/// Browser tabs stamp requests with an `x-tab-id` header; each sighting
/// refreshes that tab's activity record, which feeds presence. Failures are
/// logged and never fail the request.
async fn track_tab_session(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    request: Request,
    next: Next,
) -> Response {
    let tab_id = request
        .headers()
        .get(TAB_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    if let Some(tab_id) = tab_id {
        if let Err(error) = state.store.touch_tab_session(&user.username, &tab_id).await {
            debug!(error = ?error, user = %user.username, "tab session touch failed");
        }
    }

    next.run(request).await
}
