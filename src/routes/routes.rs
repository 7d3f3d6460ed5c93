//! Defines routes for asset reads, uploads and deletes.
//!
//! ## Structure
//! - `GET    /{bucket}/{id}?type=&size=`: origin, derivative or fallback
//! - `HEAD   /{bucket}/{id}`: origin metadata only
//! - `PUT    /{bucket}/{id}`: upload under a caller-chosen id (auth)
//! - `DELETE /{bucket}/{id}`: delete origin and derivatives (auth, owner only)
//! - `POST   /{bucket}`: upload under a generated id (auth)
//! - `GET    /healthz`, `GET /readyz`

use crate::{
    handlers::{
        asset_handlers::{delete_asset, get_asset, head_asset, post_asset, put_asset},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. Handlers pull what they need out of `AppState`;
/// request bodies larger than `max_upload_bytes` are rejected with 413.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/{bucket}/{id}",
            get(get_asset)
                .head(head_asset)
                .put(put_asset)
                .delete(delete_asset),
        )
        .route("/{bucket}", post(post_asset))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
