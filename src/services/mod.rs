pub mod asset_service;
pub mod blob_store;
pub mod derivative_cache;
pub mod fallback;
pub mod invalidation;
pub mod necessity;
pub mod storage_service;
pub mod transform;
