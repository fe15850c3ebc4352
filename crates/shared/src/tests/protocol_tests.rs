use super::*;
use crate::domain::ChatMessage;

fn sample_message() -> ChatMessage {
    ChatMessage {
        id: MessageId(42),
        channel_id: ChannelId(7),
        author_id: UserId(3),
        content: "hello".to_string(),
        created_at: "2025-06-01T12:00:00Z".parse().expect("timestamp"),
        edited_at: None,
        deleted: false,
        author_profile: None,
    }
}

#[test]
fn message_create_frame_round_trips() {
    let event = GatewayEvent::MessageCreate(sample_message());
    let text = serde_json::to_string(&event).expect("serialize");
    let parsed: GatewayEvent = serde_json::from_str(&text).expect("parse");
    assert_eq!(parsed, event);
}

#[test]
fn unknown_tag_decodes_to_unknown_variant() {
    let parsed: GatewayEvent =
        serde_json::from_str(r#"{"type":"TypingStart","data":{"user_id":1}}"#).expect("parse");
    assert_eq!(
        parsed,
        GatewayEvent::Unknown {
            kind: "TypingStart".to_string()
        }
    );
}

#[test]
fn unknown_tag_without_data_decodes() {
    let parsed: GatewayEvent = serde_json::from_str(r#"{"type":"Heartbeat"}"#).expect("parse");
    assert_eq!(parsed.kind(), "Heartbeat");
}

#[test]
fn malformed_payload_for_known_tag_is_an_error() {
    let result = serde_json::from_str::<GatewayEvent>(r#"{"type":"MessageCreate","data":{"id":"oops"}}"#);
    assert!(result.is_err());
}

#[test]
fn missing_payload_for_known_tag_is_an_error() {
    let result = serde_json::from_str::<GatewayEvent>(r#"{"type":"MessageDelete"}"#);
    assert!(result.is_err());
}

#[test]
fn identify_frame_has_wire_shape() {
    let frame = ClientFrame::Identify {
        token: "secret".to_string(),
    };
    let value = serde_json::to_value(&frame).expect("serialize");
    assert_eq!(
        value,
        serde_json::json!({"type": "Identify", "data": {"token": "secret"}})
    );
}

#[test]
fn presence_update_uses_snake_case_status() {
    let parsed: GatewayEvent =
        serde_json::from_str(r#"{"type":"PresenceUpdate","data":{"user_id":9,"status":"dnd"}}"#)
            .expect("parse");
    assert_eq!(
        parsed,
        GatewayEvent::PresenceUpdate(PresenceUpdated {
            user_id: UserId(9),
            status: PresenceStatus::Dnd,
        })
    );
}

#[test]
fn unrecognized_instance_mode_decodes_as_unsupported() {
    let info: InstanceInfo =
        serde_json::from_str(r#"{"mode":"invite_only","name":"Private"}"#).expect("parse");
    assert_eq!(info.mode, InstanceMode::Unsupported);
    assert_eq!(info.default_server_id, None);
}
