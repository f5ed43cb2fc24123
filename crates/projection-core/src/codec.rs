//! Envelope codec with directional size caps.
//!
//! Framing (the 32-bit length prefix) belongs to the transport bridge; this
//! codec sees only frame payloads. Inbound payloads are capped at 64 KiB,
//! outbound at 1 MiB, and a payload at 80% of its cap logs a warning so cap
//! pressure is visible before frames start dropping.

use projection_error::{Direction, ProjectionError, Result};
use projection_types::{InboundEnvelope, OutboundEnvelope, INBOUND_FRAME_CAP, OUTBOUND_FRAME_CAP};
use serde_json::Value;

// Soft warning threshold: 80% of the directional cap.
const SOFT_CAP_NUM: usize = 4;
const SOFT_CAP_DEN: usize = 5;

fn warn_near_cap(direction: Direction, len: usize, cap: usize) {
    if len * SOFT_CAP_DEN >= cap * SOFT_CAP_NUM {
        tracing::warn!(
            %direction,
            len,
            cap,
            "frame payload is above 80% of its size cap"
        );
    }
}

/// Decode one renderer → core frame payload.
pub fn decode_inbound(bytes: &[u8]) -> Result<InboundEnvelope> {
    if bytes.len() > INBOUND_FRAME_CAP {
        return Err(ProjectionError::FrameTooLarge {
            direction: Direction::Inbound,
            len: bytes.len(),
            max: INBOUND_FRAME_CAP,
        });
    }
    warn_near_cap(Direction::Inbound, bytes.len(), INBOUND_FRAME_CAP);

    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| ProjectionError::decode(err.to_string()))?;
    if !value.is_object() {
        return Err(ProjectionError::invalid_envelope(
            "envelope is not a mapping",
        ));
    }
    serde_json::from_value(value).map_err(|err| ProjectionError::invalid_envelope(err.to_string()))
}

/// Encode one core → renderer envelope into a frame payload.
pub fn encode_outbound(envelope: &OutboundEnvelope) -> Result<Vec<u8>> {
    let bytes =
        serde_json::to_vec(envelope).map_err(|err| ProjectionError::encode(err.to_string()))?;
    if bytes.len() > OUTBOUND_FRAME_CAP {
        return Err(ProjectionError::FrameTooLarge {
            direction: Direction::Outbound,
            len: bytes.len(),
            max: OUTBOUND_FRAME_CAP,
        });
    }
    warn_near_cap(Direction::Outbound, bytes.len(), OUTBOUND_FRAME_CAP);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_ready() {
        let envelope = decode_inbound(br#"{"t":"ready","sid":"S1"}"#).expect("decode ready");
        assert_eq!(
            envelope,
            InboundEnvelope::Ready {
                sid: "S1".to_owned(),
                capabilities: None,
            }
        );
    }

    #[test]
    fn decodes_intent_with_payload() {
        let raw = br#"{"t":"intent","sid":"S1","name":"set_status","id":77,"payload":{"id":"dev-250"}}"#;
        let envelope = decode_inbound(raw).expect("decode intent");
        match envelope {
            InboundEnvelope::Intent {
                name, id, payload, ..
            } => {
                assert_eq!(name, "set_status");
                assert_eq!(id, Some(json!(77)));
                assert_eq!(payload.expect("payload")["id"], "dev-250");
            }
            other => panic!("expected intent, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_decode_error() {
        let err = decode_inbound(b"{not json").unwrap_err();
        assert!(matches!(err, ProjectionError::DecodeError { .. }));
        assert_eq!(err.wire_code(), "decode_error");
    }

    #[test]
    fn non_mapping_is_invalid_envelope() {
        let err = decode_inbound(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidEnvelope { .. }));
    }

    #[test]
    fn unknown_tag_is_invalid_envelope() {
        let err = decode_inbound(br#"{"t":"mystery","sid":"S1"}"#).unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidEnvelope { .. }));
    }

    #[test]
    fn oversized_inbound_is_rejected() {
        let padding = "x".repeat(INBOUND_FRAME_CAP);
        let raw = format!(r#"{{"t":"ready","sid":"{padding}"}}"#);
        let err = decode_inbound(raw.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::FrameTooLarge {
                direction: Direction::Inbound,
                ..
            }
        ));
    }

    #[test]
    fn oversized_outbound_is_rejected() {
        let envelope = OutboundEnvelope::Render {
            sid: "S1".to_owned(),
            rev: 1,
            vm: json!({"blob": "y".repeat(OUTBOUND_FRAME_CAP)}),
            ack: None,
        };
        let err = encode_outbound(&envelope).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::FrameTooLarge {
                direction: Direction::Outbound,
                ..
            }
        ));
    }

    #[test]
    fn outbound_round_trip_matches_wire_schema() {
        let envelope = OutboundEnvelope::Render {
            sid: "S1".to_owned(),
            rev: 1,
            vm: json!({"clock_label": "12:00"}),
            ack: None,
        };
        let bytes = encode_outbound(&envelope).expect("encode render");
        let value: Value = serde_json::from_slice(&bytes).expect("reparse");
        assert_eq!(value["t"], "render");
        assert_eq!(value["sid"], "S1");
        assert_eq!(value["rev"], 1);
        assert_eq!(value["vm"]["clock_label"], "12:00");
        assert!(value.get("ack").is_none());
    }
}
