//! Upload protocol handlers: declare, status, chunk upload and merge.

use crate::auth::Owner;
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use stowage_core::models::{
    ArtifactSummary, ChunkUploadResponse, DeclareUploadRequest, DeclareUploadResponse,
    MergeChunksRequest, UploadId, UploadStatusResponse,
};
use stowage_core::Fingerprint;
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub struct StatusQuery {
    /// When given, must equal the declared whole-file MD5
    pub whole_md5: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v0/uploads",
    tag = "uploads",
    request_body = DeclareUploadRequest,
    params(("X-Owner-Id" = String, Header, description = "Owner id")),
    responses(
        (status = 200, description = "Upload declared, or completed instantly", body = DeclareUploadResponse),
        (status = 400, description = "Invalid declaration", body = ErrorResponse),
        (status = 409, description = "Upload exists with a different declaration", body = ErrorResponse),
        (status = 413, description = "Declared size too large", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all, fields(owner = %owner))]
pub async fn declare_upload(
    owner: Owner,
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<DeclareUploadRequest>,
) -> Result<Json<DeclareUploadResponse>, HttpAppError> {
    let response = state.core.dedup.declare_upload(owner.as_str(), request).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/v0/uploads/{upload_id}",
    tag = "uploads",
    params(
        ("upload_id" = String, Path, description = "Upload id"),
        ("X-Owner-Id" = String, Header, description = "Owner id"),
        StatusQuery
    ),
    responses(
        (status = 200, description = "Upload progress", body = UploadStatusResponse),
        (status = 404, description = "Upload not found", body = ErrorResponse),
        (status = 409, description = "whole_md5 differs from the declaration", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all, fields(owner = %owner, upload_id = %upload_id))]
pub async fn get_upload_status(
    owner: Owner,
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<UploadStatusResponse>, HttpAppError> {
    let upload_id = UploadId::parse(&upload_id)?;
    let fingerprint = query
        .whole_md5
        .as_deref()
        .map(str::trim)
        .filter(|md5| !md5.is_empty())
        .map(Fingerprint::parse)
        .transpose()?;

    let status = state
        .core
        .chunks
        .status(owner.as_str(), &upload_id, fingerprint.as_ref())
        .await?;
    Ok(Json(status))
}

#[utoipa::path(
    put,
    path = "/api/v0/uploads/{upload_id}/chunks/{chunk_index}",
    tag = "uploads",
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    params(
        ("upload_id" = String, Path, description = "Upload id"),
        ("chunk_index" = i64, Path, description = "Zero-based chunk index"),
        ("X-Owner-Id" = String, Header, description = "Owner id")
    ),
    responses(
        (status = 200, description = "Chunk stored", body = ChunkUploadResponse),
        (status = 400, description = "Chunk index out of range", body = ErrorResponse),
        (status = 404, description = "Upload not found", body = ErrorResponse),
        (status = 409, description = "Upload is assembling or complete", body = ErrorResponse),
        (status = 503, description = "Storage unavailable, retry", body = ErrorResponse),
        (status = 507, description = "Insufficient disk space", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all, fields(owner = %owner, size_bytes = body.len()))]
pub async fn upload_chunk(
    owner: Owner,
    State(state): State<Arc<AppState>>,
    Path((upload_id, chunk_index)): Path<(String, i64)>,
    body: Bytes,
) -> Result<Json<ChunkUploadResponse>, HttpAppError> {
    let upload_id = UploadId::parse(&upload_id)?;
    let response = state
        .core
        .chunks
        .put_chunk(owner.as_str(), &upload_id, chunk_index, body)
        .await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/v0/uploads/{upload_id}/merge",
    tag = "uploads",
    request_body = MergeChunksRequest,
    params(
        ("upload_id" = String, Path, description = "Upload id"),
        ("X-Owner-Id" = String, Header, description = "Owner id")
    ),
    responses(
        (status = 200, description = "Artifact published", body = ArtifactSummary),
        (status = 404, description = "Upload not found", body = ErrorResponse),
        (status = 409, description = "Chunks missing, count mismatch or assembly running", body = ErrorResponse),
        (status = 422, description = "Assembled content does not match whole_md5", body = ErrorResponse),
        (status = 503, description = "Storage unavailable, retry", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all, fields(owner = %owner))]
pub async fn merge_chunks(
    owner: Owner,
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
    ValidatedJson(request): ValidatedJson<MergeChunksRequest>,
) -> Result<Json<ArtifactSummary>, HttpAppError> {
    let upload_id = UploadId::parse(&upload_id)?;
    let artifact = state
        .core
        .assembly
        .merge_chunks(owner.as_str(), &upload_id, request)
        .await?;
    Ok(Json(ArtifactSummary::from(&artifact)))
}
