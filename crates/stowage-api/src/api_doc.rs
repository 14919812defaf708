//! OpenAPI documentation, served at `/api/openapi.json` and browsable under `/docs`.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;
use stowage_core::models;
use stowage_core::ContentClass;

pub fn get_openapi_spec() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Stowage API",
        version = "0.1.0",
        description = "Resumable chunked uploads with content-addressed deduplication. Every route except /health is versioned under /api/v0/ and requires the X-Owner-Id header."
    ),
    paths(
        handlers::uploads::declare_upload,
        handlers::uploads::get_upload_status,
        handlers::uploads::upload_chunk,
        handlers::uploads::merge_chunks,
        handlers::artifacts::download_artifact,
        handlers::artifacts::artifact_thumbnail,
        handlers::artifacts::list_artifacts,
        handlers::health::health_check,
    ),
    components(
        schemas(
            models::DeclareUploadRequest,
            models::DeclareUploadResponse,
            models::ChunkCheck,
            models::UploadStatusResponse,
            models::UploadState,
            models::ChunkUploadResponse,
            models::MergeChunksRequest,
            models::ArtifactSummary,
            models::ArtifactListEntry,
            ContentClass,
            error::ErrorResponse,
        )
    ),
    tags(
        (name = "uploads", description = "Declare, resume, upload chunks and merge"),
        (name = "artifacts", description = "Download published artifacts and thumbnails"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_lists_protocol_routes() {
        let spec = get_openapi_spec();
        for path in [
            "/api/v0/uploads",
            "/api/v0/uploads/{upload_id}",
            "/api/v0/uploads/{upload_id}/chunks/{chunk_index}",
            "/api/v0/uploads/{upload_id}/merge",
            "/api/v0/artifacts/{artifact_id}",
            "/health",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
