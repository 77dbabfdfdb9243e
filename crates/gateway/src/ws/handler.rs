// WebSocket upgrade endpoints: authentication-at-connect for the per-user
// chat gateway and the membership-gated group gateway.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{info, warn};

use quad_common::protocol::group::GroupMessageRecord;

use crate::auth::jwt::AccessTokenService;
use crate::registry::RoomRegistry;
use crate::store::ChatStore;
use crate::ws::{group, session, session::DirectEvent};

/// Close codes distinguishing connect-time rejections.
pub const CLOSE_NO_CREDENTIAL: u16 = 4001;
pub const CLOSE_INVALID_CREDENTIAL: u16 = 4002;
pub const CLOSE_NOT_A_MEMBER: u16 = 4003;

/// Credential carried on the connection URL.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Clone)]
pub struct WsRouterState {
    pub token_service: Arc<AccessTokenService>,
    pub chat_registry: RoomRegistry<DirectEvent>,
    pub group_registry: RoomRegistry<GroupMessageRecord>,
    pub store: ChatStore,
}

pub fn router(state: WsRouterState) -> Router {
    Router::new()
        .route("/ws/chat", get(chat_upgrade))
        .route("/ws/group/{group_id}", get(group_upgrade))
        .with_state(state)
}

/// GET /ws/chat?token=JWT
async fn chat_upgrade(
    State(state): State<WsRouterState>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match authenticate(&state.token_service, query.token.as_deref()) {
        Ok(username) => {
            info!(user = %username, "chat socket authenticated");
            ws.on_upgrade(move |socket| {
                session::run(socket, state.chat_registry.clone(), state.store.clone(), username)
            })
        }
        Err(rejection) => reject(ws, rejection),
    }
}

/// GET /ws/group/{group_id}?token=JWT
async fn group_upgrade(
    State(state): State<WsRouterState>,
    Path(group_id): Path<i64>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let username = match authenticate(&state.token_service, query.token.as_deref()) {
        Ok(username) => username,
        Err(rejection) => return reject(ws, rejection),
    };

    // Membership is checked once, here; a non-member never reaches the room
    // or the frame loop.
    match state.store.is_group_member(group_id, &username).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(user = %username, group_id, "group socket rejected: not a member");
            return reject(
                ws,
                Rejection { code: CLOSE_NOT_A_MEMBER, reason: "not a group member" },
            );
        }
        Err(error) => {
            warn!(error = ?error, user = %username, group_id, "group membership lookup failed");
            return reject(
                ws,
                Rejection { code: CLOSE_NOT_A_MEMBER, reason: "membership unavailable" },
            );
        }
    }

    info!(user = %username, group_id, "group socket authenticated");
    ws.on_upgrade(move |socket| {
        group::run(socket, state.group_registry.clone(), state.store.clone(), group_id, username)
    })
}

struct Rejection {
    code: u16,
    reason: &'static str,
}

fn authenticate(
    token_service: &AccessTokenService,
    token: Option<&str>,
) -> Result<String, Rejection> {
    let Some(token) = token.filter(|token| !token.is_empty()) else {
        return Err(Rejection { code: CLOSE_NO_CREDENTIAL, reason: "missing credential" });
    };

    match token_service.validate(token) {
        Ok(identity) => Ok(identity.username),
        Err(error) => {
            warn!(error = %error, "socket credential rejected");
            Err(Rejection { code: CLOSE_INVALID_CREDENTIAL, reason: "invalid credential" })
        }
    }
}

/// The HTTP upgrade still completes; the distinguishing close code is the
/// first and only frame a rejected client sees.
fn reject(ws: WebSocketUpgrade, rejection: Rejection) -> Response {
    ws.on_upgrade(move |mut socket: WebSocket| async move {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: rejection.code,
                reason: rejection.reason.into(),
            })))
            .await;
    })
}
