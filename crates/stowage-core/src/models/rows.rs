//! Postgres row mappings for ledger models.

use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

use super::artifact::CompletedArtifact;
use super::upload::{ChunkRecord, UploadId, UploadSession};
use crate::hash::Fingerprint;

fn decode<T, E>(column: &str, value: Result<T, E>) -> Result<T, sqlx::Error>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    value.map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: e.into(),
    })
}

fn non_negative(column: &str, value: i64) -> Result<u64, sqlx::Error> {
    u64::try_from(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl FromRow<'_, PgRow> for UploadSession {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let upload_id: String = row.try_get("upload_id")?;
        let fingerprint: String = row.try_get("fingerprint")?;
        let state: String = row.try_get("state")?;
        let total_chunks: i32 = row.try_get("total_chunks")?;

        Ok(UploadSession {
            upload_id: decode("upload_id", UploadId::parse(&upload_id))?,
            owner: row.try_get("owner")?,
            file_name: row.try_get("file_name")?,
            total_size: non_negative("total_size", row.try_get("total_size")?)?,
            total_chunks: non_negative("total_chunks", i64::from(total_chunks))? as u32,
            fingerprint: decode("fingerprint", Fingerprint::parse(&fingerprint))?,
            state: decode("state", state.parse())?,
            category: row.try_get("category")?,
            artifact_id: row.try_get("artifact_id")?,
            last_error: row.try_get("last_error")?,
            assembly_started_at: row.try_get("assembly_started_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl FromRow<'_, PgRow> for ChunkRecord {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let upload_id: String = row.try_get("upload_id")?;
        let fingerprint: String = row.try_get("fingerprint")?;
        let status: String = row.try_get("status")?;
        let chunk_index: i32 = row.try_get("chunk_index")?;

        Ok(ChunkRecord {
            upload_id: decode("upload_id", UploadId::parse(&upload_id))?,
            chunk_index: non_negative("chunk_index", i64::from(chunk_index))? as u32,
            status: decode("status", status.parse())?,
            owner: row.try_get("owner")?,
            fingerprint: decode("fingerprint", Fingerprint::parse(&fingerprint))?,
            storage_key: row.try_get("storage_key")?,
            size_bytes: non_negative("size_bytes", row.try_get("size_bytes")?)?,
            uploaded_at: row.try_get("uploaded_at")?,
        })
    }
}

impl FromRow<'_, PgRow> for CompletedArtifact {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let fingerprint: String = row.try_get("fingerprint")?;
        let content_class: String = row.try_get("content_class")?;

        Ok(CompletedArtifact {
            artifact_id: row.try_get("artifact_id")?,
            fingerprint: decode("fingerprint", Fingerprint::parse(&fingerprint))?,
            storage_key: row.try_get("storage_key")?,
            file_name: row.try_get("file_name")?,
            size_bytes: non_negative("size_bytes", row.try_get("size_bytes")?)?,
            mime_type: row.try_get("mime_type")?,
            content_class: decode("content_class", content_class.parse())?,
            thumbnail_key: row.try_get("thumbnail_key")?,
            owner: row.try_get("owner")?,
            category: row.try_get("category")?,
            complete: row.try_get("complete")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
