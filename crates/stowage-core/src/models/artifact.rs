use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::content::ContentClass;
use crate::hash::Fingerprint;

/// A published, content-addressed artifact. One per distinct whole-file fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedArtifact {
    pub artifact_id: String,
    pub fingerprint: Fingerprint,
    pub storage_key: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub content_class: ContentClass,
    pub thumbnail_key: Option<String>,
    pub owner: String,
    pub category: Option<String>,
    pub complete: bool,
    pub created_at: DateTime<Utc>,
}

impl CompletedArtifact {
    /// External identifier for a fingerprint
    pub fn id_for(fingerprint: &Fingerprint) -> String {
        fingerprint.as_str().to_string()
    }
}

/// Client-facing view of a completed artifact
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ArtifactSummary {
    pub artifact_id: String,
    pub file_name: String,
    pub size: u64,
    pub mime_type: String,
    pub content_class: ContentClass,
    pub has_thumbnail: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub whole_md5: String,
}

impl From<&CompletedArtifact> for ArtifactSummary {
    fn from(artifact: &CompletedArtifact) -> Self {
        Self {
            artifact_id: artifact.artifact_id.clone(),
            file_name: artifact.file_name.clone(),
            size: artifact.size_bytes,
            mime_type: artifact.mime_type.clone(),
            content_class: artifact.content_class,
            has_thumbnail: artifact.thumbnail_key.is_some(),
            category: artifact.category.clone(),
            whole_md5: artifact.fingerprint.to_string(),
        }
    }
}
