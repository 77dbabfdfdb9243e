// Per-connection group chat session. Membership is checked once at connect
// (in the upgrade handler); the loop itself persists first and fans out the
// durable record, so a failed write is visible to the sender and invisible
// to everyone else.

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use quad_common::protocol::group::{GroupClientFrame, GroupMessageRecord, GroupSend, GroupServerFrame};

use crate::registry::RoomRegistry;
use crate::store::ChatStore;

pub fn group_room(group_id: i64) -> String {
    format!("group_{group_id}")
}

pub(crate) async fn run(
    mut socket: WebSocket,
    registry: RoomRegistry<GroupMessageRecord>,
    store: ChatStore,
    group_id: i64,
    username: String,
) {
    let conn_id = Uuid::new_v4();
    let room = group_room(group_id);

    let (room_tx, mut room_rx) = mpsc::unbounded_channel::<GroupMessageRecord>();
    registry.join(&room, conn_id, room_tx).await;

    debug!(user = %username, room = %room, "group session active");

    loop {
        tokio::select! {
            maybe_record = room_rx.recv() => {
                let Some(record) = maybe_record else { break };
                if !send_frame(&mut socket, &GroupServerFrame::Message(record)).await {
                    break;
                }
            }
            maybe_frame = socket.recv() => {
                let Some(frame) = maybe_frame else { break };
                match frame {
                    Ok(Message::Text(raw)) => {
                        let keep_going = handle_text_frame(
                            &mut socket,
                            &registry,
                            &store,
                            &room,
                            group_id,
                            &username,
                            &raw,
                        )
                        .await;
                        if !keep_going {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    registry.leave(&room, conn_id).await;
    debug!(user = %username, room = %room, "group session closed");
}

async fn handle_text_frame(
    socket: &mut WebSocket,
    registry: &RoomRegistry<GroupMessageRecord>,
    store: &ChatStore,
    room: &str,
    group_id: i64,
    username: &str,
    raw: &str,
) -> bool {
    let frame = match serde_json::from_str::<GroupClientFrame>(raw) {
        Ok(frame) => frame,
        Err(error) => {
            debug!(error = %error, user = %username, "unparseable group frame");
            return send_frame(socket, &GroupServerFrame::Error {
                message: "malformed frame".to_string(),
            })
            .await;
        }
    };

    match frame {
        GroupClientFrame::Ping(ping) => {
            send_frame(socket, &GroupServerFrame::Pong { timestamp: ping.timestamp }).await
        }
        GroupClientFrame::Send(send) => {
            handle_group_send(socket, registry, store, room, group_id, username, send).await
        }
    }
}

/// Persist-then-publish: the room only ever sees records the store accepted,
/// and each subscriber (sender included) sees the record exactly once.
async fn handle_group_send(
    socket: &mut WebSocket,
    registry: &RoomRegistry<GroupMessageRecord>,
    store: &ChatStore,
    room: &str,
    group_id: i64,
    username: &str,
    send: GroupSend,
) -> bool {
    if send.message.trim().is_empty() {
        return send_frame(socket, &GroupServerFrame::Error {
            message: "empty message body".to_string(),
        })
        .await;
    }

    match store
        .append_group_message(group_id, username, &send.message, send.attachment)
        .await
    {
        Ok(record) => {
            registry.publish(room, record).await;
            true
        }
        Err(error) => {
            warn!(error = ?error, user = %username, group_id, "group message write failed");
            send_frame(socket, &GroupServerFrame::Error {
                message: "message was not saved".to_string(),
            })
            .await
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &GroupServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(encoded) => socket.send(Message::Text(encoded.into())).await.is_ok(),
        Err(error) => {
            warn!(error = %error, "failed to encode group frame");
            true
        }
    }
}
