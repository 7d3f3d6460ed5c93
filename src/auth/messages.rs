//! Wire messages exchanged with the token authority.
//!
//! Payloads travel as JSON strings discriminated by their `type` field. A
//! payload that does not parse into one of the known kinds is dropped.

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMessage {
    VerifyRequest {
        request_id: Uuid,
        token: String,
    },
    VerifyResponse {
        request_id: Uuid,
        outcome: VerifyOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum VerifyOutcome {
    Verified { owner_id: String },
    Rejected { reason: String },
}

impl AuthMessage {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a payload, returning `None` for anything unrecognised.
    pub fn decode(payload: &str) -> Option<Self> {
        match serde_json::from_str(payload) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!("ignoring unrecognised auth payload: {}", err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let id = Uuid::nil();
        let encoded = AuthMessage::VerifyRequest {
            request_id: id,
            token: "abc".into(),
        }
        .encode()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "verify_request");
        assert_eq!(value["token"], "abc");
    }

    #[test]
    fn response_decodes_outcome() {
        let payload = r#"{"type":"verify_response","request_id":"00000000-0000-0000-0000-000000000000","outcome":{"action":"verified","owner_id":"alice"}}"#;
        assert_eq!(
            AuthMessage::decode(payload),
            Some(AuthMessage::VerifyResponse {
                request_id: Uuid::nil(),
                outcome: VerifyOutcome::Verified {
                    owner_id: "alice".into()
                },
            })
        );
    }

    #[test]
    fn unknown_kinds_are_dropped() {
        assert_eq!(AuthMessage::decode(r#"{"type":"ping"}"#), None);
        assert_eq!(AuthMessage::decode("not json"), None);
        assert_eq!(
            AuthMessage::decode(r#"{"type":"verify_response","request_id":"00000000-0000-0000-0000-000000000000","outcome":{"action":"shrug"}}"#),
            None
        );
    }
}
