//! Event model - append-only system event log

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub event_type: String,
    pub device_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub severity: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    /// Severities that count toward incident derivation
    pub fn is_incident_grade(&self) -> bool {
        *self >= Severity::Error
    }
}

/// Event to append; severity is validated by construction
#[derive(Debug)]
pub struct NewEvent<'a> {
    pub event_type: &'a str,
    pub device_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub severity: Severity,
    pub message: String,
    pub metadata: serde_json::Value,
    pub source: &'a str,
}

#[derive(Debug, Deserialize, Default)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub device_id: Option<Uuid>,
    pub severity: Option<Severity>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EventStats {
    pub total_events: i64,
    pub events_24h: i64,
    pub events_7d: i64,
    pub by_severity: Vec<CountBucket>,
    pub by_type: Vec<CountBucket>,
    pub open_incidents: i64,
}

#[derive(Debug, Serialize)]
pub struct CountBucket {
    pub key: String,
    pub count: i64,
}

impl Event {
    pub async fn record(pool: &PgPool, event: NewEvent<'_>) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Event>(
            r#"
            INSERT INTO events (event_type, device_id, user_id, severity, message, metadata, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#
        )
        .bind(event.event_type)
        .bind(event.device_id)
        .bind(event.user_id)
        .bind(event.severity.as_str())
        .bind(&event.message)
        .bind(&event.metadata)
        .bind(event.source)
        .fetch_one(pool)
        .await
    }

    pub async fn list(pool: &PgPool, filter: &EventFilter) -> Result<Vec<Self>, sqlx::Error> {
        let limit = filter.limit.unwrap_or(50);
        let offset = filter.offset.unwrap_or(0);

        sqlx::query_as::<_, Event>(
            r#"
            SELECT * FROM events
            WHERE ($1::text IS NULL OR event_type = $1)
              AND ($2::uuid IS NULL OR device_id = $2)
              AND ($3::text IS NULL OR severity = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#
        )
        .bind(&filter.event_type)
        .bind(filter.device_id)
        .bind(filter.severity.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    /// Qualifying events from one device inside the derivation window
    pub async fn count_incident_grade(
        pool: &PgPool,
        device_id: Uuid,
        window_minutes: i32,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM events
            WHERE device_id = $1
              AND severity IN ('error', 'critical')
              AND created_at > NOW() - $2 * INTERVAL '1 minute'
            "#
        )
        .bind(device_id)
        .bind(window_minutes as f64)
        .fetch_one(pool)
        .await
    }

    pub async fn stats(pool: &PgPool) -> Result<EventStats, sqlx::Error> {
        let totals: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE created_at >= NOW() - INTERVAL '24 hours'),
                COUNT(*) FILTER (WHERE created_at >= NOW() - INTERVAL '7 days')
            FROM events
            "#
        )
        .fetch_one(pool)
        .await?;

        let by_severity = bucket_counts(pool, "SELECT severity AS key, COUNT(*) AS count FROM events GROUP BY severity ORDER BY count DESC").await?;
        let by_type = bucket_counts(pool, "SELECT event_type AS key, COUNT(*) AS count FROM events GROUP BY event_type ORDER BY count DESC LIMIT 20").await?;

        let open_incidents = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM incidents WHERE status = 'open'"
        )
        .fetch_one(pool)
        .await?;

        Ok(EventStats {
            total_events: totals.0,
            events_24h: totals.1,
            events_7d: totals.2,
            by_severity,
            by_type,
            open_incidents,
        })
    }
}

async fn bucket_counts(pool: &PgPool, sql: &str) -> Result<Vec<CountBucket>, sqlx::Error> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|r| CountBucket {
            key: r.get::<String, _>("key"),
            count: r.get::<i64, _>("count"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_matches_escalation() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn only_error_and_above_are_incident_grade() {
        assert!(!Severity::Info.is_incident_grade());
        assert!(!Severity::Warning.is_incident_grade());
        assert!(Severity::Error.is_incident_grade());
        assert!(Severity::Critical.is_incident_grade());
    }

    #[test]
    fn severity_rejects_unknown_values() {
        assert!(serde_json::from_str::<Severity>("\"fatal\"").is_err());
        let sev: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(sev, Severity::Critical);
    }
}
