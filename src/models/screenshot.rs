//! Screenshot model - write-once forensic captures

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Screenshot {
    pub id: Uuid,
    pub device_id: Uuid,
    pub event_id: Option<Uuid>,
    pub taken_by: Option<Uuid>,
    pub captured_at: DateTime<Utc>,
    pub file_name: String,
    pub file_path: String,
    pub content_hash: String,
    pub file_size: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct StoreScreenshotRequest {
    /// Base64-encoded image bytes
    pub data: String,
    pub captured_at: Option<DateTime<Utc>>,
    pub file_name: Option<String>,
    pub event_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ScreenshotFilter {
    pub device_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Decode and size-check an uploaded screenshot payload
pub fn decode_payload(data: &str, max_bytes: usize) -> Result<Vec<u8>, AppError> {
    let bytes = BASE64
        .decode(data)
        .map_err(|_| AppError::ValidationError("data must be valid base64".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::ValidationError("data must not be empty".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(AppError::PayloadTooLarge);
    }
    Ok(bytes)
}

pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

impl Screenshot {
    #[allow(clippy::too_many_arguments)]
    pub async fn store(
        pool: &PgPool,
        device_id: Uuid,
        event_id: Option<Uuid>,
        taken_by: Option<Uuid>,
        captured_at: DateTime<Utc>,
        file_name: &str,
        file_path: &str,
        hash: &str,
        file_size: i64,
        metadata: serde_json::Value,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Screenshot>(
            r#"
            INSERT INTO screenshots (device_id, event_id, taken_by, captured_at, file_name,
                                     file_path, content_hash, file_size, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#
        )
        .bind(device_id)
        .bind(event_id)
        .bind(taken_by)
        .bind(captured_at)
        .bind(file_name)
        .bind(file_path)
        .bind(hash)
        .bind(file_size)
        .bind(metadata)
        .fetch_one(pool)
        .await
    }

    pub async fn list(pool: &PgPool, filter: &ScreenshotFilter) -> Result<Vec<Self>, sqlx::Error> {
        let limit = filter.limit.unwrap_or(50);
        let offset = filter.offset.unwrap_or(0);

        sqlx::query_as::<_, Screenshot>(
            r#"
            SELECT * FROM screenshots
            WHERE ($1::uuid IS NULL OR device_id = $1)
            ORDER BY captured_at DESC
            LIMIT $2 OFFSET $3
            "#
        )
        .bind(filter.device_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_base64() {
        let err = decode_payload("not//valid!!", 1024).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn rejects_oversized_payload() {
        let data = BASE64.encode(vec![0u8; 2048]);
        let err = decode_payload(&data, 1024).unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge));
    }

    #[test]
    fn accepts_payload_at_the_cap() {
        let data = BASE64.encode(vec![7u8; 1024]);
        let bytes = decode_payload(&data, 1024).unwrap();
        assert_eq!(bytes.len(), 1024);
    }

    #[test]
    fn hash_is_hex_sha256() {
        let hash = content_hash(b"deskguard");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
