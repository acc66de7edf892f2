fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use wswrap_protocol::{Message, ResponseError};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture file: the literal bytes a ws-wrapper JavaScript
    /// peer produces.
    fn load_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
            .trim()
            .to_string()
    }

    fn as_value(json: &str) -> serde_json::Value {
        serde_json::from_str(json).unwrap_or_else(|e| panic!("not valid JSON: {e}\n{json}"))
    }

    /// Deserializes a fixture into a [`Message`], re-serializes it, and
    /// compares the two JSON documents, order-independently. The message
    /// arguments are raw values, so everything goes through strings. A
    /// mismatch here is a wire incompatibility.
    fn roundtrip(name: &str) -> Message {
        let fixture = load_fixture(name);
        let parsed: Message = serde_json::from_str(&fixture)
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_string(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            as_value(&fixture),
            as_value(&reserialized),
            "roundtrip mismatch for {name}:\n  peer: {fixture}\n  ours: {reserialized}"
        );
        parsed
    }

    #[test]
    fn fixture_event_message() {
        let msg = roundtrip("event_message.json");
        assert_eq!(msg.channel, "chat");
        assert_eq!(msg.event_name().as_deref(), Some("message"));
        assert_eq!(msg.handler_arguments().len(), 2);
        assert_eq!(msg.request_id, None);
        assert_eq!(msg.response(), Err(ResponseError::NotAResponse));
    }

    #[test]
    fn fixture_request_message() {
        let msg = roundtrip("request_message.json");
        assert_eq!(msg.channel, "");
        assert_eq!(msg.event_name().as_deref(), Some("echo"));
        assert_eq!(msg.request_id, Some(1));
        assert_eq!(msg.handler_arguments()[0].get(), r#""hi""#);
    }

    #[test]
    fn fixture_resolve_response() {
        let msg = roundtrip("resolve_response.json");
        assert_eq!(msg.event_name(), None);
        assert_eq!(msg.response(), Ok(serde_json::json!("hi")));
    }

    #[test]
    fn fixture_reject_response() {
        let msg = roundtrip("reject_response.json");
        assert_eq!(
            msg.response(),
            Err(ResponseError::Rejected(
                "no event listener for 'missing'".into()
            ))
        );
    }

    #[test]
    fn fixture_js_error_response() {
        let msg = roundtrip("js_error_response.json");
        assert!(msg.js_error);
        assert_eq!(msg.response(), Err(ResponseError::Rejected("boom".into())));
    }

    #[test]
    fn fixture_keepalive_marker() {
        let msg = roundtrip("keepalive.json");
        assert!(msg.is_ignored());
        assert_eq!(msg.event_name(), None);
        assert_eq!(msg.request_id, None);
    }

    // --- outbound shapes: what our peers will parse -----------------------

    #[test]
    fn outbound_resolve_matches_peer_bytes() {
        let ours = serde_json::to_string(&Message::resolve(1, serde_json::json!("hi"))).unwrap();
        assert_eq!(as_value(&load_fixture("resolve_response.json")), as_value(&ours));
    }

    #[test]
    fn outbound_reject_matches_peer_bytes() {
        let ours =
            serde_json::to_string(&Message::reject(2, "no event listener for 'missing'")).unwrap();
        assert_eq!(as_value(&load_fixture("reject_response.json")), as_value(&ours));
    }

    #[test]
    fn outbound_event_matches_peer_bytes() {
        let msg = Message::event("chat", "message", ("bob", "hi there")).unwrap();
        let ours = serde_json::to_string(&msg).unwrap();
        assert_eq!(as_value(&load_fixture("event_message.json")), as_value(&ours));
    }

    #[test]
    fn outbound_request_omits_empty_fields() {
        let msg = Message::request("", "echo", ("hi",), 1).unwrap();
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"a":["echo","hi"],"i":1}"#);
    }
}
