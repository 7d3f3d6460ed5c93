//! HTTP handlers for asset reads, uploads and deletes.
//! All asset semantics live in `AssetService`; handlers translate between
//! HTTP and the service.

use crate::{
    auth::Owner,
    errors::AppError,
    models::asset::OriginAsset,
    services::asset_service::{AssetService, ReadRequest, ServedAsset},
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State, rejection::BytesRejection},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

/// Response header telling clients how a read was satisfied.
pub const X_DERIVATIVE: HeaderName = HeaderName::from_static("x-derivative");

/// Query params accepted by `GET /{bucket}/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct ReadQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub size: Option<String>,
}

/// GET `/{bucket}/{id}`: origin, derivative or fallback bytes.
pub async fn get_asset(
    State(assets): State<AssetService>,
    Path((bucket, id)): Path<(String, String)>,
    Query(q): Query<ReadQuery>,
) -> Result<Response, AppError> {
    let request = ReadRequest::parse(q.kind.as_deref(), q.size.as_deref())?;
    let served = assets.read(&bucket, &id, request).await?;
    Ok(served_response(served))
}

/// HEAD `/{bucket}/{id}`: origin metadata only, no transforms.
pub async fn head_asset(
    State(assets): State<AssetService>,
    Path((bucket, id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let origin = assets.head(&bucket, &id).await?;
    let mut response = Response::new(Body::empty());
    let headers = response.headers_mut();
    set_content_headers(headers, &origin.content_type, origin.size_bytes.max(0) as usize);
    set_etag(headers, &origin.etag);
    Ok(response)
}

/// PUT `/{bucket}/{id}`: upload under a caller-chosen id.
pub async fn put_asset(
    State(assets): State<AssetService>,
    Owner(owner_id): Owner,
    Path((bucket, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, AppError> {
    let bytes = body.map_err(body_error)?;
    let origin = assets
        .upload(&bucket, Some(id), content_type(&headers), bytes, &owner_id)
        .await?;
    Ok(created(origin))
}

/// POST `/{bucket}`: upload under a generated id.
pub async fn post_asset(
    State(assets): State<AssetService>,
    Owner(owner_id): Owner,
    Path(bucket): Path<String>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, AppError> {
    let bytes = body.map_err(body_error)?;
    let origin = assets
        .upload(&bucket, None, content_type(&headers), bytes, &owner_id)
        .await?;
    Ok(created(origin))
}

/// DELETE `/{bucket}/{id}`: remove an origin and its derivatives.
pub async fn delete_asset(
    State(assets): State<AssetService>,
    Owner(owner_id): Owner,
    Path((bucket, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    assets.delete(&bucket, &id, &owner_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Upload bodies are capped by the router's `DefaultBodyLimit`; an oversized
/// body surfaces here as 413.
fn body_error(rejection: BytesRejection) -> AppError {
    AppError::new(rejection.status(), rejection.body_text())
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn created(origin: OriginAsset) -> Response {
    let etag = origin.etag.clone();
    let mut response = (StatusCode::CREATED, Json(origin)).into_response();
    set_etag(response.headers_mut(), &etag);
    response
}

fn served_response(served: ServedAsset) -> Response {
    let len = served.bytes.len();
    let mut response = Response::new(Body::from(served.bytes));
    let headers = response.headers_mut();
    set_content_headers(headers, &served.content_type, len);
    set_etag(headers, &served.etag);
    headers.insert(X_DERIVATIVE, HeaderValue::from_static(served.source.as_str()));
    response
}

fn set_content_headers(headers: &mut HeaderMap, content_type: &str, len: usize) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
}

fn set_etag(headers: &mut HeaderMap, etag: &str) {
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
        headers.insert(header::ETAG, value);
    }
}
