use quad_common::protocol::chat::{
    derive_message_id, ChatSend, ClientFrame, Delivery, Ping, PingTag, ServerFrame,
};
use quad_common::protocol::group::{GroupMessageRecord, GroupSend, GroupServerFrame};
use serde_json::Value;

#[test]
fn chat_server_frame_shapes_match_the_wire_contract() {
    let payload = Delivery {
        message: "hello".to_string(),
        sender: "amara".to_string(),
        receiver: "bo".to_string(),
        message_id: derive_message_id("amara", "bo", 1_700_000_000_123),
        timestamp: 1_700_000_000,
        conversation_id: Some(9),
        is_new_conversation: true,
        sender_full_name: Some("Amara Okafor".to_string()),
        sender_profile_picture: Some("profile_pictures/amara.png".to_string()),
    };

    let samples = [
        (
            ServerFrame::Pong { timestamp: 1_700_000_000_000 },
            "pong",
            &["type", "timestamp"][..],
        ),
        (
            ServerFrame::Message(payload.clone()),
            "message",
            &[
                "type",
                "message",
                "sender",
                "receiver",
                "message_id",
                "timestamp",
                "conversation_id",
                "is_new_conversation",
                "sender_full_name",
                "sender_profile_picture",
            ][..],
        ),
        (
            ServerFrame::MessageSent(payload),
            "message_sent",
            &["type", "message", "sender", "receiver", "message_id", "timestamp"][..],
        ),
        (
            ServerFrame::ConversationRefresh { conversation_id: Some(9), sender: "amara".to_string() },
            "conversation_refresh",
            &["type", "conversation_id", "sender"][..],
        ),
        (
            ServerFrame::Error { message: "malformed frame".to_string() },
            "error",
            &["type", "message"][..],
        ),
    ];

    for (frame, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(frame).expect("server frame should serialize");
        assert_eq!(value["type"], expected_type);
        for key in expected_keys {
            assert!(
                value.get(key).is_some(),
                "serialized `{expected_type}` frame must include `{key}`",
            );
        }
    }
}

#[test]
fn optional_delivery_fields_are_omitted_when_absent() {
    let frame = ServerFrame::Message(Delivery {
        message: "hello".to_string(),
        sender: "amara".to_string(),
        receiver: "bo".to_string(),
        message_id: derive_message_id("amara", "bo", 1_700_000_000_123),
        timestamp: 1_700_000_000,
        conversation_id: None,
        is_new_conversation: false,
        sender_full_name: None,
        sender_profile_picture: None,
    });

    let value = serde_json::to_value(frame).expect("server frame should serialize");
    let keys = object_keys(&value);
    assert!(!keys.contains(&"sender_full_name".to_string()));
    assert!(!keys.contains(&"sender_profile_picture".to_string()));
    // conversation_id stays on the wire as an explicit null.
    assert_eq!(value["conversation_id"], Value::Null);
}

#[test]
fn chat_client_frames_round_trip() {
    let ping = ClientFrame::Ping(Ping { tag: PingTag::Ping, timestamp: 1_700_000_000_000 });
    let send = ClientFrame::Send(ChatSend {
        message: "hello".to_string(),
        sender: "amara".to_string(),
        receiver: "bo".to_string(),
        timestamp: None,
    });

    for frame in [ping, send] {
        let raw = serde_json::to_string(&frame).expect("client frame should serialize");
        let decoded =
            serde_json::from_str::<ClientFrame>(&raw).expect("client frame should decode");
        assert_eq!(decoded, frame);
    }
}

#[test]
fn group_frame_shapes_match_the_wire_contract() {
    let record = GroupMessageRecord {
        id: 3,
        group_id: 11,
        sender: "amara".to_string(),
        message: "meeting moved".to_string(),
        attachment: None,
        timestamp: 1_700_000_000,
    };

    let message = serde_json::to_value(GroupServerFrame::Message(record))
        .expect("group frame should serialize");
    assert_eq!(message["type"], "message");
    for key in ["id", "group_id", "sender", "message", "timestamp"] {
        assert!(message.get(key).is_some(), "group message frame must include `{key}`");
    }

    let send = serde_json::to_value(GroupSend { message: "meeting moved".to_string(), attachment: None })
        .expect("group send should serialize");
    assert_eq!(object_keys(&send), vec!["message".to_string()]);
}

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys =
        value.as_object().expect("value should be an object").keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
}
