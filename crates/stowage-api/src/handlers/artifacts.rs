//! Finished-artifact handlers: download with byte ranges, thumbnails, listing.

use crate::auth::Owner;
use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use std::sync::Arc;
use stowage_core::models::ArtifactListEntry;
use stowage_core::AppError;
use stowage_services::{ArtifactLocation, ByteRange};

/// Artifacts are content-addressed, so a given id never changes content
const ARTIFACT_CACHE_CONTROL: &str = "private, max-age=31536000, immutable";

fn quoted_etag(location: &ArtifactLocation) -> String {
    format!("\"{}\"", location.etag)
}

/// File name safe to place inside a quoted header parameter
fn header_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn requested_range(headers: &HeaderMap) -> Result<Option<ByteRange>, AppError> {
    match headers.get(header::RANGE) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| AppError::InvalidInput("Range header must be ASCII".to_string()))?;
            ByteRange::parse(value)
        }
        None => Ok(None),
    }
}

fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| {
            let tag = tag.trim();
            tag == "*" || tag.trim_start_matches("W/") == etag
        }))
}

#[utoipa::path(
    get,
    path = "/api/v0/artifacts/{artifact_id}",
    tag = "artifacts",
    params(
        ("artifact_id" = String, Path, description = "Artifact id (whole-file MD5)"),
        ("X-Owner-Id" = String, Header, description = "Owner id"),
        ("Range" = Option<String>, Header, description = "bytes=a-b, bytes=a- or bytes=-n")
    ),
    responses(
        (status = 200, description = "Whole artifact", content_type = "application/octet-stream"),
        (status = 206, description = "Requested byte range", content_type = "application/octet-stream"),
        (status = 304, description = "ETag matched If-None-Match"),
        (status = 404, description = "Artifact not found", body = ErrorResponse),
        (status = 416, description = "Range not satisfiable", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all, fields(owner = %_owner, artifact_id = %artifact_id))]
pub async fn download_artifact(
    _owner: Owner,
    State(state): State<Arc<AppState>>,
    Path(artifact_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    let range = requested_range(&headers)?;

    if range.is_none() && headers.contains_key(header::IF_NONE_MATCH) {
        let location = state.core.lookup.resolve(&artifact_id).await?;
        let etag = quoted_etag(&location);
        if etag_matches(&headers, &etag) {
            return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
        }
    }

    let read = state.core.lookup.read(&artifact_id, range).await?;
    let location = &read.location;

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, location.artifact.mime_type.as_str())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::ETAG, quoted_etag(location))
        .header(header::CACHE_CONTROL, ARTIFACT_CACHE_CONTROL)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "inline; filename=\"{}\"",
                header_file_name(&location.artifact.file_name)
            ),
        );

    builder = match &read.range {
        Some(range) => {
            tracing::debug!(start = range.start, end = range.end, "Serving byte range");
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, range.len())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", range.start, range.end, range.size),
                )
        }
        None => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, location.size),
    };

    let body_stream = read.body.map(|result| {
        result.map_err(|e| std::io::Error::other(format!("Storage stream error: {}", e)))
    });

    let response = builder
        .body(Body::from_stream(body_stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response)
}

#[utoipa::path(
    get,
    path = "/api/v0/artifacts/{artifact_id}/thumbnail",
    tag = "artifacts",
    params(
        ("artifact_id" = String, Path, description = "Artifact id"),
        ("X-Owner-Id" = String, Header, description = "Owner id")
    ),
    responses(
        (status = 200, description = "PNG thumbnail", content_type = "image/png"),
        (status = 404, description = "No thumbnail for this artifact", body = ErrorResponse)
    )
)]
pub async fn artifact_thumbnail(
    _owner: Owner,
    State(state): State<Arc<AppState>>,
    Path(artifact_id): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    let png = state.core.lookup.thumbnail(&artifact_id).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, ARTIFACT_CACHE_CONTROL),
        ],
        png,
    ))
}

#[utoipa::path(
    get,
    path = "/api/v0/artifacts",
    tag = "artifacts",
    params(("X-Owner-Id" = String, Header, description = "Owner id")),
    responses(
        (status = 200, description = "Completed uploads of the caller", body = Vec<ArtifactListEntry>)
    )
)]
pub async fn list_artifacts(
    owner: Owner,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ArtifactListEntry>>, HttpAppError> {
    let entries = state.core.lookup.list(owner.as_str()).await?;
    Ok(Json(entries))
}
