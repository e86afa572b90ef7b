//! JSON wire codec for signaling envelopes.
//!
//! One JSON object per message:
//!
//! ```text
//! { "uuid": "<id>", "sdp": { "type": "offer", "sdp": "..." }, "call": true }
//! { "uuid": "<id>", "ice": { "candidate": "...", "sdpMid": "0", "sdpMLineIndex": 0 } }
//! { "uuid": "<id>", "bye": true }
//! ```
//!
//! An optional `"to": "<id>"` addresses the message to a single participant.
//! Exactly one of `sdp` / `ice` / `bye` must be present.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::{Envelope, IceCandidate, Payload, SessionDescription};
use crate::error::{Result, SignalError};
use crate::identity::ParticipantId;

/// Raw object as it appears on the wire, before shape validation
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sdp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    call: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bye: Option<bool>,
}

/// Serialize an envelope to its wire bytes
pub fn encode(envelope: &Envelope) -> Result<Bytes> {
    let mut wire = WireEnvelope {
        uuid: Some(envelope.sender.to_string()),
        to: envelope.recipient.as_ref().map(ToString::to_string),
        ..Default::default()
    };

    match &envelope.payload {
        Payload::Description { description, call } => {
            wire.sdp = Some(serde_json::to_value(description)?);
            wire.call = Some(*call);
        },
        Payload::Candidate(candidate) => {
            wire.ice = Some(serde_json::to_value(candidate)?);
        },
        Payload::Bye => {
            wire.bye = Some(true);
        },
    }

    Ok(Bytes::from(serde_json::to_vec(&wire)?))
}

/// Parse wire bytes into an envelope
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let wire: WireEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| SignalError::Decode(format!("not a signaling object: {e}")))?;

    let sender = parse_id(wire.uuid.as_deref(), "uuid")?
        .ok_or_else(|| SignalError::Decode("missing uuid".to_string()))?;
    let recipient = parse_id(wire.to.as_deref(), "to")?;

    let bye = wire.bye.unwrap_or(false);
    let present = [wire.sdp.is_some(), wire.ice.is_some(), bye]
        .iter()
        .filter(|p| **p)
        .count();
    if present == 0 {
        return Err(SignalError::Decode(
            "message carries no sdp, ice or bye payload".to_string(),
        ));
    }
    if present > 1 {
        return Err(SignalError::Decode(
            "message carries more than one payload".to_string(),
        ));
    }

    let payload = if let Some(sdp) = wire.sdp {
        let description: SessionDescription = serde_json::from_value(sdp)
            .map_err(|e| SignalError::Decode(format!("invalid sdp payload: {e}")))?;
        // Peers that predate the flag only ever send initial offers.
        Payload::Description {
            description,
            call: wire.call.unwrap_or(true),
        }
    } else if let Some(ice) = wire.ice {
        let candidate: IceCandidate = serde_json::from_value(ice)
            .map_err(|e| SignalError::Decode(format!("invalid ice payload: {e}")))?;
        Payload::Candidate(candidate)
    } else {
        Payload::Bye
    };

    Ok(Envelope {
        sender,
        recipient,
        payload,
    })
}

/// Read only the sender of a message, without validating the payload.
///
/// The relay uses this to learn who is behind a connection.
pub fn peek_sender(bytes: &[u8]) -> Option<ParticipantId> {
    let wire: WireEnvelope = serde_json::from_slice(bytes).ok()?;
    parse_id(wire.uuid.as_deref(), "uuid").ok().flatten()
}

fn parse_id(raw: Option<&str>, field: &str) -> Result<Option<ParticipantId>> {
    match raw {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| SignalError::Decode(format!("empty {field}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    #[test]
    fn test_decode_browser_offer() {
        let raw = json!({
            "uuid": "8a1f0c2e-55aa-4c1b-9d1e-0f1e2d3c4b5a",
            "sdp": { "type": "offer", "sdp": "v=0\r\n" },
            "call": true
        });
        let env = decode(raw.to_string().as_bytes()).unwrap();
        assert_eq!(env.sender.as_str(), "8a1f0c2e-55aa-4c1b-9d1e-0f1e2d3c4b5a");
        assert!(env.recipient.is_none());
        match env.payload {
            Payload::Description { description, call } => {
                assert!(description.is_offer());
                assert_eq!(description.sdp, "v=0\r\n");
                assert!(call);
            },
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_decode_browser_candidate_keeps_unknown_fields() {
        let raw = json!({
            "uuid": "b",
            "ice": {
                "candidate": "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
                "usernameFragment": null,
                "foundation": "1"
            }
        });
        let env = decode(raw.to_string().as_bytes()).unwrap();
        let cand = env.get_candidate().unwrap();
        assert_eq!(cand.sdp_mid.as_deref(), Some("0"));
        assert_eq!(cand.sdp_m_line_index, Some(0));
        assert!(cand.username_fragment.is_none());
        assert_eq!(cand.extra.get("foundation"), Some(&json!("1")));

        let back: Value = serde_json::from_slice(&encode(&env).unwrap()).unwrap();
        assert_eq!(back["ice"]["foundation"], "1");
    }

    #[test]
    fn test_encode_matches_wire_shape() {
        let env = Envelope::description(id("a"), SessionDescription::answer("v=0"), true);
        let value: Value = serde_json::from_slice(&encode(&env).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({ "uuid": "a", "sdp": { "type": "answer", "sdp": "v=0" }, "call": true })
        );

        let bye = Envelope::bye(id("a")).to(id("b"));
        let value: Value = serde_json::from_slice(&encode(&bye).unwrap()).unwrap();
        assert_eq!(value, json!({ "uuid": "a", "to": "b", "bye": true }));
    }

    #[test]
    fn test_missing_call_defaults_to_initial() {
        let raw = r#"{"uuid":"a","sdp":{"type":"answer","sdp":"x"}}"#;
        match decode(raw.as_bytes()).unwrap().payload {
            Payload::Description { call, .. } => assert!(call),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_rejects_malformed() {
        let cases = [
            "not json",
            "[]",
            r#"{"sdp":{"type":"offer","sdp":"x"}}"#,
            r#"{"uuid":"","bye":true}"#,
            r#"{"uuid":"a"}"#,
            r#"{"uuid":"a","bye":false}"#,
            r#"{"uuid":"a","ice":null}"#,
            r#"{"uuid":"a","sdp":{"type":"pranswer","sdp":"x"}}"#,
            r#"{"uuid":"a","sdp":{"type":"offer"}}"#,
            r#"{"uuid":"a","ice":{"sdpMid":"0"}}"#,
            r#"{"uuid":"a","sdp":{"type":"offer","sdp":"x"},"ice":{"candidate":""}}"#,
        ];
        for raw in cases {
            let err = decode(raw.as_bytes()).unwrap_err();
            assert!(matches!(err, SignalError::Decode(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn test_peek_sender() {
        assert_eq!(peek_sender(br#"{"uuid":"x","bye":true}"#), Some(id("x")));
        assert_eq!(peek_sender(br#"{"uuid":"x"}"#), Some(id("x")));
        assert_eq!(peek_sender(b"garbage"), None);
        assert_eq!(peek_sender(br#"{"uuid":""}"#), None);
    }

    #[test]
    fn test_padded_identity_survives_round_trip() {
        let envelope = Envelope::bye(id(" a ")).to(id("b\t"));
        let decoded = decode(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(peek_sender(&encode(&envelope).unwrap()), Some(id(" a ")));
    }
}
