//! Audit log model - append-only trail of administrative actions

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditLog {
    pub id: i64,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub target: String,
    pub target_id: Option<String>,
    pub details: serde_json::Value,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AuditFilter {
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditLog {
    /// Append an audit entry. Called by every mutating handler; failures are
    /// logged and never fail the surrounding request.
    pub async fn record(
        pool: &PgPool,
        actor_id: Option<Uuid>,
        action: &str,
        target: &str,
        target_id: Option<String>,
        details: serde_json::Value,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_log (actor_id, action, target, target_id, details)
            VALUES ($1, $2, $3, $4, $5)
            "#
        )
        .bind(actor_id)
        .bind(action)
        .bind(target)
        .bind(&target_id)
        .bind(&details)
        .execute(pool)
        .await;

        if let Err(e) = result {
            tracing::warn!("Failed to write audit entry {}: {}", action, e);
        }
    }

    pub async fn list(pool: &PgPool, filter: &AuditFilter) -> Result<Vec<Self>, sqlx::Error> {
        let limit = filter.limit.unwrap_or(50);
        let offset = filter.offset.unwrap_or(0);

        sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT * FROM audit_log
            WHERE ($1::uuid IS NULL OR actor_id = $1)
              AND ($2::text IS NULL OR action = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        )
        .bind(filter.actor_id)
        .bind(&filter.action)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }
}
