//! Core data models for the asset server.
//!
//! `bucket`, `object` and `metadata` describe what the blob store keeps;
//! `asset` and `derivative` describe origin images and their cached
//! transforms on top of it.

pub mod asset;
pub mod bucket;
pub mod derivative;
pub mod metadata;
pub mod object;
