//! Tagged wire envelopes and patch operations.
//!
//! The renderer and the core exchange length-framed JSON objects
//! discriminated by a `"t"` tag. Inbound and outbound sets are disjoint:
//! the renderer sends `ready`/`intent`, the core sends
//! `render`/`patch`/`error`. Optional wire fields deserialize leniently and
//! are omitted on serialization when absent, so emitted JSON matches the
//! protocol schemas exactly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope traveling renderer → core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum InboundEnvelope {
    /// Renderer is (re)connected and requests a full snapshot.
    #[serde(rename = "ready")]
    Ready {
        sid: String,
        /// Opaque feature flags from the renderer, preserved for diagnostics.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capabilities: Option<Value>,
    },

    /// A user action or routing request.
    #[serde(rename = "intent")]
    Intent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sid: Option<String>,
        name: String,
        /// Client-chosen id echoed back as `ack`. Tolerates any JSON shape;
        /// see [`normalize_ack`] for what survives.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

/// Envelope traveling core → renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum OutboundEnvelope {
    /// Full view-model snapshot.
    #[serde(rename = "render")]
    Render {
        sid: String,
        rev: u64,
        vm: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
    },

    /// Minimal structural patch against the previous snapshot.
    #[serde(rename = "patch")]
    Patch {
        sid: String,
        rev: u64,
        ops: Vec<PatchOp>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
    },

    /// Protocol-level failure report.
    #[serde(rename = "error")]
    Error {
        sid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rev: Option<u64>,
        code: String,
        message: String,
    },
}

impl OutboundEnvelope {
    /// Revision carried by this envelope, if any.
    pub fn rev(&self) -> Option<u64> {
        match self {
            Self::Render { rev, .. } | Self::Patch { rev, .. } => Some(*rev),
            Self::Error { rev, .. } => *rev,
        }
    }
}

/// RFC 6902 operation against a JSON Pointer path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum PatchOp {
    /// Path did not exist before and exists now.
    #[serde(rename = "add")]
    Add { path: String, value: Value },

    /// Path exists in both snapshots with a different value.
    #[serde(rename = "replace")]
    Replace { path: String, value: Value },

    /// Path no longer exists.
    #[serde(rename = "remove")]
    Remove { path: String },
}

impl PatchOp {
    /// The JSON Pointer this op targets.
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Replace { path, .. } | Self::Remove { path } => path,
        }
    }
}

/// Normalize a raw intent id to an acknowledgement token.
///
/// Acks are unsigned on the wire (renderers allocate ids from 1 upward),
/// so only non-negative integers survive. Strings, floats, and other JSON
/// shapes are treated as absent, and a negative integer collapses to
/// absent too because it has no `u64` echo.
pub fn normalize_ack(id: Option<&Value>) -> Option<u64> {
    id.and_then(Value::as_u64)
}

/// Normalize a raw intent payload to a JSON object.
///
/// Non-object payloads collapse to the empty object.
pub fn normalize_payload(payload: Option<Value>) -> Value {
    match payload {
        Some(value @ Value::Object(_)) => value,
        _ => Value::Object(serde_json::Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_ready_with_capabilities() {
        let raw = r#"{"t":"ready","sid":"S1","capabilities":{"m1":true,"transport":"stdio-packet-4"}}"#;
        let envelope: InboundEnvelope = serde_json::from_str(raw).expect("decode ready");
        match envelope {
            InboundEnvelope::Ready { sid, capabilities } => {
                assert_eq!(sid, "S1");
                assert_eq!(capabilities.expect("capabilities")["m1"], true);
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn decodes_intent_without_optional_fields() {
        let raw = r#"{"t":"intent","name":"clock.pause"}"#;
        let envelope: InboundEnvelope = serde_json::from_str(raw).expect("decode intent");
        match envelope {
            InboundEnvelope::Intent {
                sid,
                name,
                id,
                payload,
            } => {
                assert_eq!(sid, None);
                assert_eq!(name, "clock.pause");
                assert_eq!(id, None);
                assert_eq!(payload, None);
            }
            other => panic!("expected intent, got {other:?}"),
        }
    }

    #[test]
    fn encodes_patch_without_ack_key_when_absent() {
        let envelope = OutboundEnvelope::Patch {
            sid: "S1".to_owned(),
            rev: 3,
            ops: vec![PatchOp::Remove {
                path: "/stale".to_owned(),
            }],
            ack: None,
        };
        let encoded = serde_json::to_string(&envelope).expect("encode patch");
        assert!(!encoded.contains("ack"));
        assert!(encoded.contains(r#""t":"patch""#));
        assert!(encoded.contains(r#""op":"remove""#));
    }

    #[test]
    fn patch_envelope_round_trip() {
        let envelope = OutboundEnvelope::Patch {
            sid: "S1".to_owned(),
            rev: 2,
            ops: vec![
                PatchOp::Replace {
                    path: "/clock_label".to_owned(),
                    value: json!("Label 20"),
                },
                PatchOp::Add {
                    path: "/devices/by_id/dev-9".to_owned(),
                    value: json!({"status": "Online"}),
                },
            ],
            ack: Some(20),
        };
        let encoded = serde_json::to_string(&envelope).expect("encode");
        let decoded: OutboundEnvelope = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.rev(), Some(2));
    }

    #[test]
    fn error_envelope_rev_is_optional() {
        let raw = r#"{"t":"error","sid":"S1","code":"decode_error","message":"bad frame"}"#;
        let decoded: OutboundEnvelope = serde_json::from_str(raw).expect("decode error envelope");
        assert_eq!(decoded.rev(), None);
    }

    #[test]
    fn ack_normalization_keeps_only_unsigned_integers() {
        assert_eq!(normalize_ack(Some(&json!(77))), Some(77));
        assert_eq!(normalize_ack(Some(&json!(0))), Some(0));
        assert_eq!(normalize_ack(Some(&json!(u64::MAX))), Some(u64::MAX));
        assert_eq!(normalize_ack(Some(&json!("77"))), None);
        assert_eq!(normalize_ack(Some(&json!(2.5))), None);
        // No u64 echo exists for a negative id.
        assert_eq!(normalize_ack(Some(&json!(-1))), None);
        assert_eq!(normalize_ack(None), None);
    }

    #[test]
    fn payload_normalization_collapses_non_objects() {
        let obj = json!({"id": "dev-1"});
        assert_eq!(normalize_payload(Some(obj.clone())), obj);
        assert_eq!(normalize_payload(Some(json!([1, 2]))), json!({}));
        assert_eq!(normalize_payload(Some(json!("x"))), json!({}));
        assert_eq!(normalize_payload(None), json!({}));
    }

    #[test]
    fn patch_op_path_accessor() {
        let op = PatchOp::Replace {
            path: "/a/b".to_owned(),
            value: json!(1),
        };
        assert_eq!(op.path(), "/a/b");
    }
}
