//! Security incident model and derivation rule

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use validator::Validate;

use super::event::Severity;

/// Incident type used by the automatic derivation rule
pub const DERIVED_INCIDENT_TYPE: &str = "excessive_errors";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Incident {
    pub id: Uuid,
    pub device_id: Uuid,
    pub incident_type: String,
    pub severity: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub assigned_to: Option<Uuid>,
    pub event_count: i32,
    pub window_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Investigating,
    Resolved,
    FalsePositive,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Investigating => "investigating",
            Self::Resolved => "resolved",
            Self::FalsePositive => "false_positive",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Resolved | Self::FalsePositive)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateIncidentRequest {
    pub device_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub incident_type: String,
    pub severity: Severity,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateIncidentStatusRequest {
    pub status: IncidentStatus,
    pub assigned_to: Option<Uuid>,
}

#[derive(Debug, Deserialize, Default)]
pub struct IncidentFilter {
    pub status: Option<String>,
    pub severity: Option<Severity>,
    pub device_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Whether the qualifying-event count inside the window trips the rule
pub fn meets_threshold(qualifying_events: i64, threshold: i64) -> bool {
    threshold > 0 && qualifying_events >= threshold
}

impl Incident {
    pub async fn create(pool: &PgPool, data: &CreateIncidentRequest) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Incident>(
            r#"
            INSERT INTO incidents (device_id, incident_type, severity, title, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#
        )
        .bind(data.device_id)
        .bind(&data.incident_type)
        .bind(data.severity.as_str())
        .bind(&data.title)
        .bind(&data.description)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Incident>("SELECT * FROM incidents WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool, filter: &IncidentFilter) -> Result<Vec<Self>, sqlx::Error> {
        let limit = filter.limit.unwrap_or(50);
        let offset = filter.offset.unwrap_or(0);

        sqlx::query_as::<_, Incident>(
            r#"
            SELECT * FROM incidents
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR severity = $2)
              AND ($3::uuid IS NULL OR device_id = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#
        )
        .bind(&filter.status)
        .bind(filter.severity.map(|s| s.as_str()))
        .bind(filter.device_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn update_status(
        pool: &PgPool,
        id: Uuid,
        status: IncidentStatus,
        assigned_to: Option<Uuid>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Incident>(
            r#"
            UPDATE incidents
            SET status = $2,
                assigned_to = COALESCE($3, assigned_to),
                resolved_at = CASE WHEN $4 THEN NOW() ELSE resolved_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(id)
        .bind(status.as_str())
        .bind(assigned_to)
        .bind(status.is_closed())
        .fetch_optional(pool)
        .await
    }

    /// Derivation rule: N incident-grade events from one device within the
    /// window open an incident. Idempotent while one is already open for the
    /// device: the open incident is refreshed instead of duplicated.
    pub async fn derive_for_device(
        pool: &PgPool,
        device_id: Uuid,
        qualifying_events: i64,
        threshold: i64,
        window_minutes: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        if !meets_threshold(qualifying_events, threshold) {
            return Ok(None);
        }

        let open = sqlx::query_as::<_, Incident>(
            r#"
            SELECT * FROM incidents
            WHERE device_id = $1
              AND incident_type = $2
              AND status IN ('open', 'investigating')
            ORDER BY created_at DESC
            LIMIT 1
            "#
        )
        .bind(device_id)
        .bind(DERIVED_INCIDENT_TYPE)
        .fetch_optional(pool)
        .await?;

        if let Some(existing) = open {
            let refreshed = sqlx::query_as::<_, Incident>(
                "UPDATE incidents SET event_count = $2, updated_at = NOW() WHERE id = $1 RETURNING *"
            )
            .bind(existing.id)
            .bind(qualifying_events as i32)
            .fetch_one(pool)
            .await?;
            return Ok(Some(refreshed));
        }

        let incident = sqlx::query_as::<_, Incident>(
            r#"
            INSERT INTO incidents (device_id, incident_type, severity, title, description,
                                   event_count, window_started_at)
            VALUES ($1, $2, 'error', $3, $4, $5, NOW() - $6 * INTERVAL '1 minute')
            RETURNING *
            "#
        )
        .bind(device_id)
        .bind(DERIVED_INCIDENT_TYPE)
        .bind(format!("{} error events within {} minutes", qualifying_events, window_minutes))
        .bind("Automatically derived from the event stream; review the device's recent events.")
        .bind(qualifying_events as i32)
        .bind(window_minutes as f64)
        .fetch_one(pool)
        .await?;

        tracing::info!("Incident {} opened for device {}", incident.id, device_id);
        Ok(Some(incident))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive() {
        assert!(!meets_threshold(4, 5));
        assert!(meets_threshold(5, 5));
        assert!(meets_threshold(6, 5));
    }

    #[test]
    fn zero_threshold_never_fires() {
        assert!(!meets_threshold(100, 0));
    }

    #[test]
    fn closed_statuses_stamp_resolution() {
        assert!(IncidentStatus::Resolved.is_closed());
        assert!(IncidentStatus::FalsePositive.is_closed());
        assert!(!IncidentStatus::Open.is_closed());
        assert!(!IncidentStatus::Investigating.is_closed());
    }
}
