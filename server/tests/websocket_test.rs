//! Wire format of the subscription socket, as the server writes it and a
//! client reads it.

use serde_json::json;
use tillsync_engine::protocol::{ClientMessage, GeneratedKey, ServerMessage};
use tillsync_engine::{materialize, CollectionPath, SyncSchema};

#[cfg(test)]
mod websocket_protocol_tests {
    use super::*;

    #[test]
    fn test_client_messages_deserialize() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);

        let msg: ClientMessage = serde_json::from_str(r#"{"type": "refresh"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Refresh);
    }

    #[test]
    fn test_unknown_client_message_is_an_error() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type": "push"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_snapshot_serialization() {
        let msg = ServerMessage::snapshot(
            "pos/inventory",
            Some(json!({"ITEM-001": {"code": "ITEM-001", "qty": 4}})),
        );
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains(r#""type":"snapshot""#));
        assert!(json.contains(r#""path":"pos/inventory""#));
        assert!(json.contains(r#""qty":4"#));
    }

    #[test]
    fn test_absent_value_is_null_on_the_wire() {
        let json = serde_json::to_value(ServerMessage::snapshot("pos/sales", None)).unwrap();
        assert_eq!(
            json,
            json!({"type": "snapshot", "path": "pos/sales", "value": null})
        );
    }

    #[test]
    fn test_snapshot_materializes_on_the_client() {
        let schema = SyncSchema::point_of_sale("pos");
        let path = CollectionPath::of(&schema, "customers").to_string();
        let sent = ServerMessage::snapshot(
            path.clone(),
            Some(json!({
                "C-1": {"name": "Kamal", "phone": "0711"},
                "C-2": {"name": "Nimal"}
            })),
        );

        let text = serde_json::to_string(&sent).unwrap();
        let received: ServerMessage = serde_json::from_str(&text).unwrap();
        let ServerMessage::Snapshot { path: got, value } = received else {
            panic!("Expected Snapshot message");
        };
        assert_eq!(got, path);

        let records = materialize(Some(&value));
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.synced));
        assert_eq!(records[0].firebase_id.as_deref(), Some("C-1"));
    }

    #[test]
    fn test_error_and_pong_serialization() {
        assert_eq!(
            serde_json::to_string(&ServerMessage::Pong).unwrap(),
            r#"{"type":"pong"}"#
        );

        let json = serde_json::to_value(ServerMessage::error("Invalid message format")).unwrap();
        assert_eq!(
            json,
            json!({"type": "error", "message": "Invalid message format"})
        );
    }

    #[test]
    fn test_generated_key_body() {
        let body: GeneratedKey =
            serde_json::from_str(r#"{"key": "0190b2a1c3d47e5f8a9b0c1d2e3f4a5b"}"#).unwrap();
        assert_eq!(body.key, "0190b2a1c3d47e5f8a9b0c1d2e3f4a5b");
    }
}
