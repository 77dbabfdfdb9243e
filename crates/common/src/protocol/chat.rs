// WebSocket message types for the quad-chat.v1 protocol (1:1 chat).

use serde::{Deserialize, Serialize};

/// Literal `"ping"` tag carried by the client liveness frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PingTag {
    Ping,
}

/// Client -> Server: liveness probe, answered immediately with `pong`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ping {
    #[serde(rename = "type")]
    pub tag: PingTag,
    /// Client wall clock in milliseconds, echoed back verbatim.
    pub timestamp: i64,
}

/// Client -> Server: a chat send. This frame carries no `type` tag on the
/// wire, so [`ClientFrame`] decodes as an untagged union.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSend {
    pub message: String,
    pub sender: String,
    pub receiver: String,
    /// Client wall clock in milliseconds; the gateway generates one when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// All frames a chat client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ClientFrame {
    Ping(Ping),
    Send(ChatSend),
}

/// Which fanned-out copy of a chat event a session is delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    /// The copy published to the receiver's room.
    Received,
    /// The confirmation copy published to the sender's own room, so every
    /// other tab or device of the sender sees the event too.
    Echo,
}

/// Payload shared by the `message` and `message_sent` server frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    pub message: String,
    pub sender: String,
    pub receiver: String,
    pub message_id: String,
    /// Server-side unix timestamp in seconds.
    pub timestamp: i64,
    /// Known only when the conversation already existed when the event was
    /// fanned out; durable assignment happens out of band.
    pub conversation_id: Option<i64>,
    pub is_new_conversation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_profile_picture: Option<String>,
}

/// All frames the chat gateway may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Pong {
        timestamp: i64,
    },
    /// A chat event delivered to its receiver.
    Message(Delivery),
    /// The sender-side confirmation copy of a chat event.
    MessageSent(Delivery),
    /// Tells the receiving client to refetch its conversation list after
    /// first contact from a new correspondent.
    ConversationRefresh {
        conversation_id: Option<i64>,
        sender: String,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    /// Wrap a delivery payload in the frame matching its fanout copy.
    pub fn delivery(kind: DeliveryKind, payload: Delivery) -> Self {
        match kind {
            DeliveryKind::Received => Self::Message(payload),
            DeliveryKind::Echo => Self::MessageSent(payload),
        }
    }
}

/// Derive the deterministic identifier for a chat event.
///
/// A retransmission of the same frame derives the same identifier, which is
/// what session-level dedup keys on. Two distinct messages between the same
/// pair within one millisecond collide and the later one is treated as a
/// duplicate.
pub fn derive_message_id(sender: &str, receiver: &str, timestamp_ms: i64) -> String {
    format!("{sender}_{receiver}_{timestamp_ms}")
}

pub fn decode_client_frame(raw: &str) -> Result<ClientFrame, serde_json::Error> {
    serde_json::from_str::<ClientFrame>(raw)
}

pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}
