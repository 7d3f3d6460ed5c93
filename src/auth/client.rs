//! Request/response correlation for token verification.
//!
//! Each `verify` call registers a single-shot waiter under a fresh request id,
//! sends the request, and waits for the matching response or the timeout.
//! The waiter is removed on every exit path.

use super::{
    AuthError,
    messages::{AuthMessage, VerifyOutcome},
};
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};
use uuid::Uuid;

type Waiters = DashMap<Uuid, oneshot::Sender<VerifyOutcome>>;

#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<Inner>,
}

struct Inner {
    pending: Waiters,
    outbound: mpsc::Sender<String>,
    timeout: Duration,
}

/// Removes a waiter when the verifying future finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a Waiters,
    request_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.request_id);
    }
}

impl AuthClient {
    pub fn new(outbound: mpsc::Sender<String>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                outbound,
                timeout,
            }),
        }
    }

    /// Resolve the owner id behind a bearer token.
    pub async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(request_id, tx);
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            request_id,
        };

        let payload = AuthMessage::VerifyRequest {
            request_id,
            token: token.to_string(),
        }
        .encode()?;
        self.inner
            .outbound
            .send(payload)
            .await
            .map_err(|_| AuthError::ChannelClosed)?;

        let outcome = match tokio::time::timeout(self.inner.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(AuthError::ChannelClosed),
            Err(_) => {
                warn!(%request_id, pending = self.pending(), "token verification timed out");
                return Err(AuthError::Timeout);
            }
        };

        match outcome {
            VerifyOutcome::Verified { owner_id } => Ok(owner_id),
            VerifyOutcome::Rejected { reason } => Err(AuthError::Rejected(reason)),
        }
    }

    /// Route an inbound payload to its waiter. Returns whether a waiter was
    /// resolved; anything else is a no-op.
    pub fn dispatch(&self, payload: &str) -> bool {
        match AuthMessage::decode(payload) {
            Some(AuthMessage::VerifyResponse {
                request_id,
                outcome,
            }) => match self.inner.pending.remove(&request_id) {
                Some((_, waiter)) => waiter.send(outcome).is_ok(),
                None => {
                    debug!(%request_id, "no waiter for auth response");
                    false
                }
            },
            Some(AuthMessage::VerifyRequest { .. }) => {
                debug!("ignoring verify request on the response channel");
                false
            }
            None => false,
        }
    }

    /// Spawn the task feeding inbound payloads to `dispatch`.
    pub fn spawn_dispatcher(&self, mut inbound: mpsc::Receiver<String>) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            while let Some(payload) = inbound.recv().await {
                client.dispatch(&payload);
            }
            debug!("auth response channel closed");
        })
    }

    /// Number of requests still awaiting a response.
    pub fn pending(&self) -> usize {
        self.inner.pending.len()
    }
}
