//! Bearer-token authentication.
//!
//! Verification is delegated to an authority reached over a message channel
//! (`AuthClient` correlates requests with responses). The binary wires the
//! client to an in-process `StaticAuthority`.

pub mod authority;
pub mod client;
pub mod messages;

use crate::errors::AppError;
use authority::StaticAuthority;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, header, request::Parts},
};
use client::AuthClient;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("token rejected: {0}")]
    Rejected(String),
    #[error("token verification timed out")]
    Timeout,
    #[error("token authority is unavailable")]
    ChannelClosed,
    #[error("failed to encode auth message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::Rejected(_) => {
                AppError::new(StatusCode::UNAUTHORIZED, err.to_string())
            }
            AuthError::Timeout | AuthError::ChannelClosed => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            AuthError::Encode(_) => {
                tracing::error!("auth failure: {}", err);
                AppError::internal("internal server error")
            }
        }
    }
}

/// Connect a client to an in-process static authority.
pub fn connect_static(authority: StaticAuthority, timeout: Duration) -> AuthClient {
    let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (response_tx, response_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let client = AuthClient::new(request_tx, timeout);
    authority.spawn(request_rx, response_tx);
    client.spawn_dispatcher(response_rx);
    client
}

/// Owner id of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl<S> FromRequestParts<S> for Owner
where
    AuthClient: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or(AuthError::MissingToken)?;

        let client = AuthClient::from_ref(state);
        let owner_id = client.verify(token).await?;
        Ok(Owner(owner_id))
    }
}

fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
