//! Device model - registered Windows agents and their outbound actions

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use validator::Validate;

use super::event::Severity;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub os_version: Option<String>,
    pub agent_version: Option<String>,
    pub status: String,
    pub is_locked: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_lock_time: Option<DateTime<Utc>>,
    pub last_unlock_time: Option<DateTime<Utc>>,
    pub hardware_info: serde_json::Value,
    pub location: Option<String>,
    pub department: Option<String>,
    #[serde(skip_serializing)]
    pub token_hash: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Locked,
    Unlocked,
    Error,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
            Self::Error => "error",
        }
    }
}

/// Remote actions an administrator can dispatch to an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Lock,
    Unlock,
    Screenshot,
    RestartAgent,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Screenshot => "screenshot",
            Self::RestartAgent => "restart_agent",
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterDeviceRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub hostname: String,
    #[validate(length(max = 17))]
    pub mac_address: Option<String>,
    pub ip_address: Option<String>,
    pub os_version: Option<String>,
    pub agent_version: Option<String>,
    pub location: Option<String>,
    pub department: Option<String>,
    pub hardware_info: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct RegisterDeviceResponse {
    pub device: Device,
    /// Agent credential, shown once; only its hash is stored
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateDeviceRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub os_version: Option<String>,
    pub location: Option<String>,
    pub department: Option<String>,
    pub hardware_info: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub status: DeviceStatus,
    pub is_locked: bool,
    pub cpu_usage: Option<f32>,
    pub memory_usage: Option<f32>,
    pub disk_usage: Option<f32>,
    pub agent_version: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub server_time: i64,
    /// Actions queued for this device, marked sent on delivery
    pub actions: Vec<DeviceAction>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DispatchActionRequest {
    pub action: ActionKind,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ActionResultRequest {
    pub status: ActionOutcome,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionOutcome {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeviceAction {
    pub id: Uuid,
    pub device_id: Uuid,
    pub action_type: String,
    pub initiated_by: Option<Uuid>,
    pub status: String,
    pub reason: Option<String>,
    pub force: bool,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DeviceFilter {
    pub status: Option<DeviceStatus>,
    pub online: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeviceStats {
    pub total_devices: i64,
    pub online_devices: i64,
    pub offline_devices: i64,
    pub locked_devices: i64,
}

/// One event to append as a heartbeat side effect
#[derive(Debug, PartialEq, Eq)]
pub struct TransitionEvent {
    pub event_type: &'static str,
    pub severity: Severity,
    pub message: String,
}

/// Events implied by a heartbeat, as a pure function of the observed change.
///
/// A status transition yields exactly one `state_change` event. A lock-state
/// flip that no dispatched lock/unlock action accounts for yields one
/// `unexpected_lock_change` warning.
pub fn transition_events(
    prev_status: &str,
    prev_locked: bool,
    next_status: DeviceStatus,
    next_locked: bool,
    lock_action_in_flight: bool,
) -> Vec<TransitionEvent> {
    let mut events = Vec::new();

    if prev_status != next_status.as_str() {
        let severity = if next_status == DeviceStatus::Error {
            Severity::Error
        } else {
            Severity::Info
        };
        events.push(TransitionEvent {
            event_type: "state_change",
            severity,
            message: format!("Device status changed from {} to {}", prev_status, next_status.as_str()),
        });
    }

    if prev_locked != next_locked && !lock_action_in_flight {
        events.push(TransitionEvent {
            event_type: "unexpected_lock_change",
            severity: Severity::Warning,
            message: format!(
                "Lock state changed to {} without a dispatched action",
                if next_locked { "locked" } else { "unlocked" }
            ),
        });
    }

    events
}

impl Device {
    pub async fn register(
        pool: &PgPool,
        data: &RegisterDeviceRequest,
        token_hash: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Device>(
            r#"
            INSERT INTO devices (name, hostname, mac_address, ip_address, os_version,
                                 agent_version, location, department, hardware_info, token_hash, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, COALESCE($9, '{}'::jsonb), $10, 'offline')
            RETURNING *
            "#
        )
        .bind(&data.name)
        .bind(&data.hostname)
        .bind(&data.mac_address)
        .bind(&data.ip_address)
        .bind(&data.os_version)
        .bind(&data.agent_version)
        .bind(&data.location)
        .bind(&data.department)
        .bind(&data.hardware_info)
        .bind(token_hash)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_fingerprint(
        pool: &PgPool,
        mac_address: &str,
        hostname: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE mac_address = $1 AND hostname = $2"
        )
        .bind(mac_address)
        .bind(hostname)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_token_hash(pool: &PgPool, token_hash: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE token_hash = $1 AND is_active = true"
        )
        .bind(token_hash)
        .fetch_optional(pool)
        .await
    }

    pub async fn list(
        pool: &PgPool,
        filter: &DeviceFilter,
        offline_after_seconds: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let limit = filter.limit.unwrap_or(50);
        let offset = filter.offset.unwrap_or(0);

        sqlx::query_as::<_, Device>(
            r#"
            SELECT * FROM devices
            WHERE is_active = true
              AND ($1::text IS NULL OR status = $1)
              AND ($2::boolean IS NULL
                   OR ($2 = true AND last_seen >= NOW() - $3 * INTERVAL '1 second')
                   OR ($2 = false AND (last_seen IS NULL OR last_seen < NOW() - $3 * INTERVAL '1 second')))
            ORDER BY last_seen DESC NULLS LAST, name
            LIMIT $4 OFFSET $5
            "#
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.online)
        .bind(offline_after_seconds as f64)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    pub async fn update_metadata(
        pool: &PgPool,
        id: Uuid,
        data: &UpdateDeviceRequest,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Device>(
            r#"
            UPDATE devices
            SET name = COALESCE($2, name),
                os_version = COALESCE($3, os_version),
                location = COALESCE($4, location),
                department = COALESCE($5, department),
                hardware_info = COALESCE($6, hardware_info),
                updated_at = NOW()
            WHERE id = $1 AND is_active = true
            RETURNING *
            "#
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.os_version)
        .bind(&data.location)
        .bind(&data.department)
        .bind(&data.hardware_info)
        .fetch_optional(pool)
        .await
    }

    pub async fn apply_heartbeat(
        pool: &PgPool,
        id: Uuid,
        req: &HeartbeatRequest,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE devices
            SET status = $2,
                is_locked = $3,
                last_seen = NOW(),
                agent_version = COALESCE($4, agent_version),
                ip_address = COALESCE($5, ip_address),
                updated_at = NOW()
            WHERE id = $1
            "#
        )
        .bind(id)
        .bind(req.status.as_str())
        .bind(req.is_locked)
        .bind(&req.agent_version)
        .bind(&req.ip_address)
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO device_heartbeats (device_id, status, is_locked, cpu_usage, memory_usage, disk_usage, agent_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#
        )
        .bind(id)
        .bind(req.status.as_str())
        .bind(req.is_locked)
        .bind(req.cpu_usage)
        .bind(req.memory_usage)
        .bind(req.disk_usage)
        .bind(&req.agent_version)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Record a lock/unlock state change driven by an admin action
    pub async fn set_lock_state(pool: &PgPool, id: Uuid, locked: bool) -> Result<(), sqlx::Error> {
        if locked {
            sqlx::query(
                "UPDATE devices SET is_locked = true, status = 'locked', last_lock_time = NOW(), updated_at = NOW() WHERE id = $1"
            )
        } else {
            sqlx::query(
                r#"
                UPDATE devices
                SET is_locked = false,
                    status = CASE WHEN last_seen >= NOW() - INTERVAL '5 minutes' THEN 'unlocked' ELSE 'offline' END,
                    last_unlock_time = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                "#
            )
        }
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Soft delete: devices are never removed, only deactivated
    pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE devices SET is_active = false, status = 'offline', updated_at = NOW() WHERE id = $1 AND is_active = true"
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn stats(pool: &PgPool, offline_after_seconds: i64) -> Result<DeviceStats, sqlx::Error> {
        let row: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE last_seen >= NOW() - $1 * INTERVAL '1 second'),
                COUNT(*) FILTER (WHERE is_locked = true)
            FROM devices WHERE is_active = true
            "#
        )
        .bind(offline_after_seconds as f64)
        .fetch_one(pool)
        .await?;

        Ok(DeviceStats {
            total_devices: row.0,
            online_devices: row.1,
            offline_devices: row.0 - row.1,
            locked_devices: row.2,
        })
    }
}

impl DeviceAction {
    pub async fn create(
        pool: &PgPool,
        device_id: Uuid,
        kind: ActionKind,
        initiated_by: Option<Uuid>,
        reason: Option<&str>,
        force: bool,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, DeviceAction>(
            r#"
            INSERT INTO device_actions (device_id, action_type, initiated_by, reason, force)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#
        )
        .bind(device_id)
        .bind(kind.as_str())
        .bind(initiated_by)
        .bind(reason)
        .bind(force)
        .fetch_one(pool)
        .await
    }

    /// Pending actions for a device, atomically moved to `sent` for delivery
    pub async fn take_pending(pool: &PgPool, device_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeviceAction>(
            r#"
            UPDATE device_actions
            SET status = 'sent', updated_at = NOW()
            WHERE device_id = $1 AND status = 'pending'
            RETURNING *
            "#
        )
        .bind(device_id)
        .fetch_all(pool)
        .await
    }

    /// Whether an admin-dispatched lock/unlock is still awaiting the agent
    pub async fn lock_action_in_flight(pool: &PgPool, device_id: Uuid) -> Result<bool, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM device_actions
            WHERE device_id = $1
              AND action_type IN ('lock', 'unlock')
              AND status IN ('pending', 'sent')
            "#
        )
        .bind(device_id)
        .fetch_one(pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn report_result(
        pool: &PgPool,
        id: Uuid,
        device_id: Uuid,
        outcome: ActionOutcome,
        error: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let status = match outcome {
            ActionOutcome::Completed => "completed",
            ActionOutcome::Failed => "failed",
        };
        sqlx::query_as::<_, DeviceAction>(
            r#"
            UPDATE device_actions
            SET status = $3,
                metadata = CASE WHEN $4::text IS NULL THEN metadata
                                ELSE metadata || jsonb_build_object('error', $4::text) END,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND device_id = $2 AND status IN ('pending', 'sent')
            RETURNING *
            "#
        )
        .bind(id)
        .bind(device_id)
        .bind(status)
        .bind(error)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_for_device(
        pool: &PgPool,
        device_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeviceAction>(
            "SELECT * FROM device_actions WHERE device_id = $1 ORDER BY created_at DESC LIMIT $2"
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Expire undelivered actions older than the TTL; returns affected ids
    pub async fn expire_stale(pool: &PgPool, ttl_minutes: i64) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE device_actions
            SET status = 'expired', updated_at = NOW()
            WHERE status IN ('pending', 'sent')
              AND created_at < NOW() - $1 * INTERVAL '1 minute'
            RETURNING id
            "#
        )
        .bind(ttl_minutes as f64)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transition_appends_exactly_one_state_change() {
        let events = transition_events("offline", true, DeviceStatus::Online, true, false);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "state_change");
        assert_eq!(events[0].severity, Severity::Info);
    }

    #[test]
    fn unchanged_heartbeat_emits_nothing() {
        let events = transition_events("online", false, DeviceStatus::Online, false, false);
        assert!(events.is_empty());
    }

    #[test]
    fn error_status_raises_severity() {
        let events = transition_events("online", false, DeviceStatus::Error, false, false);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Error);
    }

    #[test]
    fn unexpected_lock_flip_is_flagged() {
        let events = transition_events("online", false, DeviceStatus::Online, true, false);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "unexpected_lock_change");
        assert_eq!(events[0].severity, Severity::Warning);
    }

    #[test]
    fn lock_flip_with_dispatched_action_is_expected() {
        let events = transition_events("online", false, DeviceStatus::Locked, true, true);
        // status change still reported, the lock flip is accounted for
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "state_change");
    }

    #[test]
    fn action_kind_wire_names() {
        assert_eq!(ActionKind::RestartAgent.as_str(), "restart_agent");
        let kind: ActionKind = serde_json::from_str("\"restart_agent\"").unwrap();
        assert_eq!(kind, ActionKind::RestartAgent);
    }

    #[test]
    fn device_status_rejects_unknown_values() {
        assert!(serde_json::from_str::<DeviceStatus>("\"hibernating\"").is_err());
        let status: DeviceStatus = serde_json::from_str("\"locked\"").unwrap();
        assert_eq!(status, DeviceStatus::Locked);
    }
}
