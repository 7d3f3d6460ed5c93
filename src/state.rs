//! Shared application state handed to every handler.

use crate::{
    auth::client::AuthClient,
    services::{asset_service::AssetService, storage_service::StorageService},
};
use axum::extract::FromRef;

#[derive(Clone)]
pub struct AppState {
    pub assets: AssetService,
    /// Backend handle used by the readiness probe.
    pub storage: StorageService,
    pub auth: AuthClient,
}

impl FromRef<AppState> for AssetService {
    fn from_ref(state: &AppState) -> Self {
        state.assets.clone()
    }
}

impl FromRef<AppState> for StorageService {
    fn from_ref(state: &AppState) -> Self {
        state.storage.clone()
    }
}

impl FromRef<AppState> for AuthClient {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
