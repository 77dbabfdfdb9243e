// Per-connection chat session: inbound-event loop, dedup, fanout, and the
// handoff to the persistence batcher.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use quad_common::protocol::chat::{
    derive_message_id, ChatSend, ClientFrame, Delivery, DeliveryKind, ServerFrame,
};

use crate::registry::RoomRegistry;
use crate::store::{ChatStore, PendingMessage, SenderProfile};
use crate::ws::batcher;
use crate::ws::dedup::DedupWindow;

/// Identifiers a session remembers on each side of the fanout path.
pub(crate) const DEDUP_CAPACITY: usize = 100;
/// Bound on the teardown wait for the batcher to flush.
const BATCHER_SHUTDOWN_WAIT: Duration = Duration::from_secs(2);

/// One fanned-out copy of a chat event, as carried through the registry.
#[derive(Debug, Clone)]
pub struct DirectEvent {
    pub kind: DeliveryKind,
    pub delivery: Delivery,
}

pub fn chat_room(username: &str) -> String {
    format!("chat_{username}")
}

/// Drives one authenticated connection until the transport closes. The
/// session owns two dedup windows (inbound sends, outbound deliveries) and a
/// batcher task; the registry subscription is the only cross-session link.
pub(crate) async fn run(
    mut socket: WebSocket,
    registry: RoomRegistry<DirectEvent>,
    store: ChatStore,
    username: String,
) {
    let conn_id = Uuid::new_v4();
    let room = chat_room(&username);

    // Profile fields ride along on every frame this session fans out. A
    // store hiccup here degrades to absent fields, never a refusal.
    let profile = match store.profile_of(&username).await {
        Ok(profile) => profile.unwrap_or_default(),
        Err(error) => {
            debug!(error = ?error, user = %username, "profile lookup failed at connect");
            SenderProfile::default()
        }
    };

    let (room_tx, mut room_rx) = mpsc::unbounded_channel::<DirectEvent>();
    registry.join(&room, conn_id, room_tx).await;

    let (write_tx, write_rx) = mpsc::channel::<PendingMessage>(batcher::QUEUE_DEPTH);
    let mut batcher_handle = tokio::spawn(batcher::run(store.clone(), write_rx));

    let mut sent_window = DedupWindow::new(DEDUP_CAPACITY);
    let mut delivered_window = DedupWindow::new(DEDUP_CAPACITY);

    debug!(user = %username, room = %room, "chat session active");

    loop {
        tokio::select! {
            maybe_event = room_rx.recv() => {
                let Some(event) = maybe_event else { break };
                if !deliver(&mut socket, &mut delivered_window, event).await {
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
                            &write_tx,
                            &mut sent_window,
                            &username,
                            &profile,
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

    // Teardown is best-effort: the batcher gets a bounded chance to drain,
    // and the room subscription is dropped no matter how that goes.
    drop(write_tx);
    if timeout(BATCHER_SHUTDOWN_WAIT, &mut batcher_handle).await.is_err() {
        warn!(user = %username, "batcher did not drain in time, discarding pending writes");
        batcher_handle.abort();
    }
    registry.leave(&room, conn_id).await;

    debug!(user = %username, room = %room, "chat session closed");
}

/// Parse and dispatch one inbound text frame. Failures never tear the
/// session down; the offending client alone sees an `error` frame.
#[allow(clippy::too_many_arguments)]
async fn handle_text_frame(
    socket: &mut WebSocket,
    registry: &RoomRegistry<DirectEvent>,
    store: &ChatStore,
    write_tx: &mpsc::Sender<PendingMessage>,
    sent_window: &mut DedupWindow,
    username: &str,
    profile: &SenderProfile,
    raw: &str,
) -> bool {
    let frame = match serde_json::from_str::<ClientFrame>(raw) {
        Ok(frame) => frame,
        Err(error) => {
            debug!(error = %error, user = %username, "unparseable client frame");
            return send_frame(socket, &ServerFrame::Error {
                message: "malformed frame".to_string(),
            })
            .await;
        }
    };

    match frame {
        // Liveness probe: answered immediately, never touches dedup, fanout,
        // or persistence.
        ClientFrame::Ping(ping) => {
            send_frame(socket, &ServerFrame::Pong { timestamp: ping.timestamp }).await
        }
        ClientFrame::Send(send) => {
            match handle_chat_send(registry, store, write_tx, sent_window, username, profile, send)
                .await
            {
                Ok(()) => true,
                Err(error) => {
                    warn!(error = ?error, user = %username, "chat send failed");
                    send_frame(socket, &ServerFrame::Error {
                        message: "message could not be processed".to_string(),
                    })
                    .await
                }
            }
        }
    }
}

async fn handle_chat_send(
    registry: &RoomRegistry<DirectEvent>,
    store: &ChatStore,
    write_tx: &mpsc::Sender<PendingMessage>,
    sent_window: &mut DedupWindow,
    username: &str,
    profile: &SenderProfile,
    send: ChatSend,
) -> anyhow::Result<()> {
    if send.message.trim().is_empty() {
        anyhow::bail!("empty message body");
    }
    if send.receiver.trim().is_empty() {
        anyhow::bail!("missing receiver");
    }

    // The authenticated identity wins over whatever the frame claims.
    let sender = username;
    if send.sender != sender {
        debug!(claimed = %send.sender, actual = %sender, "frame sender overridden by session identity");
    }
    let receiver = send.receiver;

    let timestamp_ms = send.timestamp.unwrap_or_else(|| Utc::now().timestamp_millis());
    let timestamp_secs = timestamp_ms / 1000;
    let message_id = derive_message_id(sender, &receiver, timestamp_ms);

    // A retransmitted frame derives the same identifier and is dropped here
    // without an error or an echo.
    if !sent_window.insert(&message_id) {
        debug!(message_id = %message_id, "duplicate chat send suppressed");
        return Ok(());
    }

    // Conversation lookup is a read on the hot path; an unreachable store
    // leaves the conversation unknown and the event still fans out.
    let (conversation_id, is_new_conversation) =
        match store.conversation_between(sender, &receiver).await {
            Ok(Some(id)) => (Some(id), false),
            Ok(None) => (None, true),
            Err(error) => {
                debug!(error = ?error, "conversation lookup failed, fanning out anyway");
                (None, false)
            }
        };

    let delivery = Delivery {
        message: send.message.clone(),
        sender: sender.to_string(),
        receiver: receiver.clone(),
        message_id,
        timestamp: timestamp_secs,
        conversation_id,
        is_new_conversation,
        sender_full_name: profile.full_name.clone(),
        sender_profile_picture: profile.profile_picture.clone(),
    };

    // Fanout first. The receiver's copy and the sender's confirmation copy
    // go out before any durable write is attempted.
    if receiver != sender {
        registry
            .publish(
                &chat_room(&receiver),
                DirectEvent { kind: DeliveryKind::Received, delivery: delivery.clone() },
            )
            .await;
    }
    registry
        .publish(&chat_room(sender), DirectEvent { kind: DeliveryKind::Echo, delivery })
        .await;

    let pending = PendingMessage {
        sender: sender.to_string(),
        receiver,
        body: send.message,
        sent_at: DateTime::<Utc>::from_timestamp(timestamp_secs, 0).unwrap_or_else(Utc::now),
    };
    if let Err(error) = write_tx.try_send(pending) {
        warn!(error = %error, user = %username, "pending-write queue full, dropping durable copy");
    }

    Ok(())
}

/// Surface one event arriving via the session's room subscription. The same
/// event can reach a session twice (echo plus receive when a user messages
/// themselves); only the first copy surfaces.
async fn deliver(
    socket: &mut WebSocket,
    delivered_window: &mut DedupWindow,
    event: DirectEvent,
) -> bool {
    if !delivered_window.insert(&event.delivery.message_id) {
        return true;
    }

    let refresh = matches!(event.kind, DeliveryKind::Received) && event.delivery.is_new_conversation;
    let conversation_id = event.delivery.conversation_id;
    let sender = event.delivery.sender.clone();

    if !send_frame(socket, &ServerFrame::delivery(event.kind, event.delivery)).await {
        return false;
    }

    if refresh {
        return send_frame(socket, &ServerFrame::ConversationRefresh { conversation_id, sender })
            .await;
    }
    true
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(encoded) => socket.send(Message::Text(encoded.into())).await.is_ok(),
        Err(error) => {
            warn!(error = %error, "failed to encode server frame");
            true
        }
    }
}
