//! In-process token authority answering verify requests from a fixed table.

use super::messages::{AuthMessage, VerifyOutcome};
use std::collections::HashMap;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct StaticAuthority {
    tokens: HashMap<String, String>,
}

impl StaticAuthority {
    pub fn new(tokens: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    /// Answer a single inbound payload; `None` when there is nothing to reply.
    pub fn answer(&self, payload: &str) -> Option<AuthMessage> {
        match AuthMessage::decode(payload)? {
            AuthMessage::VerifyRequest { request_id, token } => {
                let outcome = match self.tokens.get(&token) {
                    Some(owner_id) => VerifyOutcome::Verified {
                        owner_id: owner_id.clone(),
                    },
                    None => VerifyOutcome::Rejected {
                        reason: "unknown token".into(),
                    },
                };
                Some(AuthMessage::VerifyResponse {
                    request_id,
                    outcome,
                })
            }
            AuthMessage::VerifyResponse { .. } => {
                debug!("authority ignoring a verify response");
                None
            }
        }
    }

    /// Serve requests from `requests`, replying on `responses`, until either
    /// channel closes.
    pub fn spawn(
        self,
        mut requests: mpsc::Receiver<String>,
        responses: mpsc::Sender<String>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(payload) = requests.recv().await {
                let Some(reply) = self.answer(&payload) else {
                    continue;
                };
                let encoded = match reply.encode() {
                    Ok(encoded) => encoded,
                    Err(err) => {
                        warn!("failed to encode auth reply: {}", err);
                        continue;
                    }
                };
                if responses.send(encoded).await.is_err() {
                    break;
                }
            }
            debug!("static authority stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn request(token: &str) -> String {
        AuthMessage::VerifyRequest {
            request_id: Uuid::nil(),
            token: token.into(),
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn answers_known_and_unknown_tokens() {
        let authority = StaticAuthority::new([("abc".to_string(), "alice".to_string())]);
        assert_eq!(
            authority.answer(&request("abc")),
            Some(AuthMessage::VerifyResponse {
                request_id: Uuid::nil(),
                outcome: VerifyOutcome::Verified {
                    owner_id: "alice".into()
                },
            })
        );
        assert!(matches!(
            authority.answer(&request("zzz")),
            Some(AuthMessage::VerifyResponse {
                outcome: VerifyOutcome::Rejected { .. },
                ..
            })
        ));
        assert_eq!(authority.answer("{}"), None);
    }
}
