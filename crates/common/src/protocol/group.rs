// WebSocket message types for the quad-group.v1 protocol (group chat).
//
// Group delivery is persist-first: the server fans out the durable record it
// just wrote, never a client-supplied echo.

use serde::{Deserialize, Serialize};

use super::chat::Ping;

/// Client -> Server: a group chat send. The sender is the authenticated
/// connection identity, so the frame only carries content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupSend {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

/// All frames a group chat client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum GroupClientFrame {
    Ping(Ping),
    Send(GroupSend),
}

/// The stored group message, fanned out verbatim after a successful write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMessageRecord {
    pub id: i64,
    pub group_id: i64,
    pub sender: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    /// Unix timestamp in seconds assigned by the store.
    pub timestamp: i64,
}

/// All frames the group gateway may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupServerFrame {
    Pong { timestamp: i64 },
    Message(GroupMessageRecord),
    Error { message: String },
}
