fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use bytes::Bytes;
    use peerdrop_protocol::{ChannelMessage, FileMetadata, SignalingMessage, TransferFrame};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture file as text.
    fn load_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    fn as_value(text: &str) -> serde_json::Value {
        serde_json::from_str(text).unwrap_or_else(|e| panic!("invalid JSON {text:?}: {e}"))
    }

    /// Decodes a relay fixture, re-encodes it and compares the JSON values.
    fn signaling_roundtrip(name: &str) -> SignalingMessage {
        let fixture = load_fixture(name);
        let msg = SignalingMessage::decode(&fixture)
            .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"));
        let encoded = msg.encode().unwrap();
        assert_eq!(
            as_value(&encoded),
            as_value(&fixture),
            "roundtrip mismatch for {name}"
        );
        msg
    }

    /// Decodes a data-channel control fixture, re-encodes it and compares.
    fn frame_roundtrip(name: &str) -> TransferFrame {
        let fixture = load_fixture(name);
        let frame = TransferFrame::decode(ChannelMessage::Text(fixture.clone()))
            .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"));
        let ChannelMessage::Text(encoded) = frame.encode().unwrap() else {
            panic!("{name} re-encoded as binary");
        };
        assert_eq!(
            as_value(&encoded),
            as_value(&fixture),
            "roundtrip mismatch for {name}"
        );
        frame
    }

    // -----------------------------------------------------------------------
    // Relay messages
    // -----------------------------------------------------------------------

    #[test]
    fn offer() {
        let msg = signaling_roundtrip("signaling_offer.json");
        assert_eq!(msg.kind(), "offer");
        let desc = as_value(msg.payload().as_str());
        assert_eq!(desc["type"], "offer");
        assert!(desc["sdp"].as_str().unwrap().starts_with("v=0\r\n"));
    }

    #[test]
    fn answer() {
        let msg = signaling_roundtrip("signaling_answer.json");
        assert_eq!(msg.kind(), "answer");
        assert_eq!(as_value(msg.payload().as_str())["type"], "answer");
    }

    #[test]
    fn candidate() {
        let msg = signaling_roundtrip("signaling_candidate.json");
        assert_eq!(msg.kind(), "candidate");
        let candidate = as_value(msg.payload().as_str());
        assert_eq!(candidate["sdpMid"], "0");
        assert_eq!(candidate["sdpMLineIndex"], 0);
    }

    #[test]
    fn end_of_candidates() {
        let msg = signaling_roundtrip("signaling_end_of_candidates.json");
        assert_eq!(msg.kind(), "candidate");
        assert_eq!(msg.payload().as_str(), "null");
    }

    #[test]
    fn payload_is_relayed_verbatim() {
        let fixture = load_fixture("signaling_candidate.json");
        let msg = SignalingMessage::decode(&fixture).unwrap();
        let original = &as_value(&fixture)["candidate"];
        assert_eq!(&as_value(msg.payload().as_str()), original);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(SignalingMessage::decode(r#"{"hangup":{}}"#).is_err());
        assert!(SignalingMessage::decode(r#"{"offer":{},"answer":{}}"#).is_err());
    }

    // -----------------------------------------------------------------------
    // Data-channel frames
    // -----------------------------------------------------------------------

    #[test]
    fn metadata_frame() {
        let frame = frame_roundtrip("frame_meta.json");
        assert_eq!(
            frame,
            TransferFrame::Metadata(FileMetadata {
                name: "holiday photo.jpg".into(),
                mime_type: "image/jpeg".into(),
                size: 1_000_000,
            })
        );
    }

    #[test]
    fn metadata_frame_for_empty_file() {
        let frame = frame_roundtrip("frame_meta_empty_file.json");
        let TransferFrame::Metadata(meta) = frame else {
            panic!("expected metadata, got {frame:?}");
        };
        assert_eq!(meta.size, 0);
        assert_eq!(meta.mime_type, "application/octet-stream");
    }

    #[test]
    fn close_frame() {
        assert_eq!(frame_roundtrip("frame_close.json"), TransferFrame::Close);
    }

    #[test]
    fn binary_message_is_a_chunk() {
        let data = Bytes::from_static(&[0x7b, 0x22, 0x63, 0x6c, 0x6f, 0x73, 0x65, 0x22]);
        let frame = TransferFrame::decode(ChannelMessage::Binary(data.clone())).unwrap();
        assert_eq!(frame, TransferFrame::Chunk(data.clone()));
        assert_eq!(frame.encode().unwrap(), ChannelMessage::Binary(data));
    }

    #[test]
    fn metadata_without_size_is_rejected() {
        let text = r#"{"meta":{"name":"a.txt","type":"text/plain"}}"#;
        assert!(TransferFrame::decode(ChannelMessage::Text(text.into())).is_err());
    }
}
