//! Policy model and effective-policy resolution

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub scope: String,
    pub idle_timeout_seconds: i32,
    pub manual_lock_enabled: bool,
    pub lock_hotkey: String,
    pub require_password: bool,
    pub max_unlock_attempts: i32,
    pub lockout_duration_minutes: i32,
    pub lock_message: String,
    pub enable_screenshot: bool,
    pub log_retention_days: i32,
    pub heartbeat_interval_seconds: i32,
    pub priority: i32,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyScope {
    Global,
    Group,
    Device,
}

impl PolicyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Group => "group",
            Self::Device => "device",
        }
    }
}

/// Specificity rank for precedence: device beats group beats global
fn scope_rank(scope: &str) -> u8 {
    match scope {
        "device" => 2,
        "group" => 1,
        _ => 0,
    }
}

/// Select the single effective policy from the active candidates matching a
/// device. Most specific scope wins regardless of priority; priority breaks
/// ties within a scope, then most recent creation time. Empty input resolves
/// to the built-in default.
pub fn resolve_effective(mut candidates: Vec<Policy>) -> Policy {
    candidates.sort_by(|a, b| {
        scope_rank(&b.scope)
            .cmp(&scope_rank(&a.scope))
            .then(b.priority.cmp(&a.priority))
            .then(b.created_at.cmp(&a.created_at))
    });
    candidates.into_iter().next().unwrap_or_else(Policy::system_default)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePolicyRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    pub scope: PolicyScope,
    #[validate(range(min = 30, max = 86400))]
    #[serde(default = "defaults::idle_timeout")]
    pub idle_timeout_seconds: i32,
    #[serde(default = "defaults::yes")]
    pub manual_lock_enabled: bool,
    #[serde(default = "defaults::lock_hotkey")]
    pub lock_hotkey: String,
    #[serde(default = "defaults::yes")]
    pub require_password: bool,
    #[validate(range(min = 1, max = 10))]
    #[serde(default = "defaults::max_unlock_attempts")]
    pub max_unlock_attempts: i32,
    #[validate(range(min = 1, max = 1440))]
    #[serde(default = "defaults::lockout_duration")]
    pub lockout_duration_minutes: i32,
    #[serde(default = "defaults::lock_message")]
    pub lock_message: String,
    #[serde(default)]
    pub enable_screenshot: bool,
    #[validate(range(min = 1, max = 365))]
    #[serde(default = "defaults::log_retention")]
    pub log_retention_days: i32,
    #[validate(range(min = 30, max = 3600))]
    #[serde(default = "defaults::heartbeat_interval")]
    pub heartbeat_interval_seconds: i32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "defaults::yes")]
    pub is_active: bool,
}

mod defaults {
    pub fn idle_timeout() -> i32 { 300 }
    pub fn yes() -> bool { true }
    pub fn lock_hotkey() -> String { "Win+Alt+S".to_string() }
    pub fn max_unlock_attempts() -> i32 { 3 }
    pub fn lockout_duration() -> i32 { 15 }
    pub fn lock_message() -> String {
        "This computer is locked. Please contact IT support if you need assistance.".to_string()
    }
    pub fn log_retention() -> i32 { 90 }
    pub fn heartbeat_interval() -> i32 { 60 }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePolicyRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 30, max = 86400))]
    pub idle_timeout_seconds: Option<i32>,
    pub manual_lock_enabled: Option<bool>,
    pub lock_hotkey: Option<String>,
    pub require_password: Option<bool>,
    #[validate(range(min = 1, max = 10))]
    pub max_unlock_attempts: Option<i32>,
    #[validate(range(min = 1, max = 1440))]
    pub lockout_duration_minutes: Option<i32>,
    pub lock_message: Option<String>,
    pub enable_screenshot: Option<bool>,
    #[validate(range(min = 1, max = 365))]
    pub log_retention_days: Option<i32>,
    #[validate(range(min = 30, max = 3600))]
    pub heartbeat_interval_seconds: Option<i32>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PolicyFilter {
    pub scope: Option<PolicyScope>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PolicyAssignment {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub device_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub assigned_by: Option<Uuid>,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAssignmentRequest {
    pub policy_id: Uuid,
    pub device_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct EffectivePolicyResponse {
    pub device_id: Uuid,
    pub effective_policy: Policy,
    pub applied_policies: Vec<Policy>,
}

impl Policy {
    /// Fallback applied when no active policy matches a device
    pub fn system_default() -> Self {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        Self {
            id: Uuid::nil(),
            name: "System Default".to_string(),
            description: Some("Built-in defaults applied when no policy matches".to_string()),
            scope: "global".to_string(),
            idle_timeout_seconds: defaults::idle_timeout(),
            manual_lock_enabled: true,
            lock_hotkey: defaults::lock_hotkey(),
            require_password: true,
            max_unlock_attempts: defaults::max_unlock_attempts(),
            lockout_duration_minutes: defaults::lockout_duration(),
            lock_message: defaults::lock_message(),
            enable_screenshot: false,
            log_retention_days: defaults::log_retention(),
            heartbeat_interval_seconds: defaults::heartbeat_interval(),
            priority: 0,
            is_active: true,
            created_by: None,
            created_at: epoch,
            updated_at: epoch,
        }
    }

    pub async fn create(
        pool: &PgPool,
        data: &CreatePolicyRequest,
        created_by: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Policy>(
            r#"
            INSERT INTO policies (name, description, scope, idle_timeout_seconds, manual_lock_enabled,
                                  lock_hotkey, require_password, max_unlock_attempts, lockout_duration_minutes,
                                  lock_message, enable_screenshot, log_retention_days,
                                  heartbeat_interval_seconds, priority, is_active, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#
        )
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.scope.as_str())
        .bind(data.idle_timeout_seconds)
        .bind(data.manual_lock_enabled)
        .bind(&data.lock_hotkey)
        .bind(data.require_password)
        .bind(data.max_unlock_attempts)
        .bind(data.lockout_duration_minutes)
        .bind(&data.lock_message)
        .bind(data.enable_screenshot)
        .bind(data.log_retention_days)
        .bind(data.heartbeat_interval_seconds)
        .bind(data.priority)
        .bind(data.is_active)
        .bind(created_by)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Policy>("SELECT * FROM policies WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool, filter: &PolicyFilter) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Policy>(
            r#"
            SELECT * FROM policies
            WHERE ($1::text IS NULL OR scope = $1)
              AND ($2::boolean IS NULL OR is_active = $2)
            ORDER BY priority DESC, created_at DESC
            "#
        )
        .bind(filter.scope.map(|s| s.as_str()))
        .bind(filter.is_active)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: &UpdatePolicyRequest,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Policy>(
            r#"
            UPDATE policies
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                idle_timeout_seconds = COALESCE($4, idle_timeout_seconds),
                manual_lock_enabled = COALESCE($5, manual_lock_enabled),
                lock_hotkey = COALESCE($6, lock_hotkey),
                require_password = COALESCE($7, require_password),
                max_unlock_attempts = COALESCE($8, max_unlock_attempts),
                lockout_duration_minutes = COALESCE($9, lockout_duration_minutes),
                lock_message = COALESCE($10, lock_message),
                enable_screenshot = COALESCE($11, enable_screenshot),
                log_retention_days = COALESCE($12, log_retention_days),
                heartbeat_interval_seconds = COALESCE($13, heartbeat_interval_seconds),
                priority = COALESCE($14, priority),
                is_active = COALESCE($15, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.idle_timeout_seconds)
        .bind(data.manual_lock_enabled)
        .bind(&data.lock_hotkey)
        .bind(data.require_password)
        .bind(data.max_unlock_attempts)
        .bind(data.lockout_duration_minutes)
        .bind(&data.lock_message)
        .bind(data.enable_screenshot)
        .bind(data.log_retention_days)
        .bind(data.heartbeat_interval_seconds)
        .bind(data.priority)
        .bind(data.is_active)
        .fetch_optional(pool)
        .await
    }

    /// Active policies matching a device directly, via group membership, or globally
    pub async fn candidates_for_device(pool: &PgPool, device_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Policy>(
            r#"
            SELECT DISTINCT p.* FROM policies p
            LEFT JOIN policy_assignments pa ON pa.policy_id = p.id
            LEFT JOIN device_group_members gm ON gm.group_id = pa.group_id
            WHERE p.is_active = true
              AND (p.scope = 'global'
                   OR (p.scope = 'device' AND pa.device_id = $1)
                   OR (p.scope = 'group' AND gm.device_id = $1))
            "#
        )
        .bind(device_id)
        .fetch_all(pool)
        .await
    }
}

impl PolicyAssignment {
    pub async fn create(
        pool: &PgPool,
        data: &CreateAssignmentRequest,
        assigned_by: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, PolicyAssignment>(
            r#"
            INSERT INTO policy_assignments (policy_id, device_id, group_id, assigned_by)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#
        )
        .bind(data.policy_id)
        .bind(data.device_id)
        .bind(data.group_id)
        .bind(assigned_by)
        .fetch_one(pool)
        .await
    }

    pub async fn list(pool: &PgPool, policy_id: Option<Uuid>) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, PolicyAssignment>(
            r#"
            SELECT * FROM policy_assignments
            WHERE ($1::uuid IS NULL OR policy_id = $1)
            ORDER BY assigned_at DESC
            "#
        )
        .bind(policy_id)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy(scope: &str, priority: i32, created_hour: u32) -> Policy {
        let mut p = Policy::system_default();
        p.id = Uuid::new_v4();
        p.name = format!("{}-{}", scope, priority);
        p.scope = scope.to_string();
        p.priority = priority;
        p.created_at = Utc.with_ymd_and_hms(2026, 1, 1, created_hour, 0, 0).unwrap();
        p
    }

    #[test]
    fn device_scope_wins_regardless_of_priority() {
        let global = policy("global", 10, 0);
        let device = policy("device", 1, 0);
        let resolved = resolve_effective(vec![global, device.clone()]);
        assert_eq!(resolved.id, device.id);
    }

    #[test]
    fn group_scope_beats_global() {
        let global = policy("global", 100, 0);
        let group = policy("group", 0, 0);
        let resolved = resolve_effective(vec![global, group.clone()]);
        assert_eq!(resolved.id, group.id);
    }

    #[test]
    fn priority_breaks_ties_within_a_scope() {
        let low = policy("global", 1, 0);
        let high = policy("global", 5, 0);
        let resolved = resolve_effective(vec![low, high.clone()]);
        assert_eq!(resolved.id, high.id);
    }

    #[test]
    fn newest_wins_on_equal_scope_and_priority() {
        let older = policy("group", 3, 1);
        let newer = policy("group", 3, 8);
        let resolved = resolve_effective(vec![older, newer.clone()]);
        assert_eq!(resolved.id, newer.id);
    }

    #[test]
    fn empty_candidates_resolve_to_system_default() {
        let resolved = resolve_effective(Vec::new());
        assert_eq!(resolved.id, Uuid::nil());
        assert_eq!(resolved.name, "System Default");
    }

    #[test]
    fn out_of_range_idle_timeout_names_the_field() {
        let req: CreatePolicyRequest = serde_json::from_value(serde_json::json!({
            "name": "bad",
            "scope": "global",
            "idle_timeout_seconds": 0
        }))
        .unwrap();
        let err = validator::Validate::validate(&req).unwrap_err();
        assert!(err.field_errors().contains_key("idle_timeout_seconds"));
    }

    #[test]
    fn defaults_pass_validation() {
        let req: CreatePolicyRequest = serde_json::from_value(serde_json::json!({
            "name": "baseline",
            "scope": "global"
        }))
        .unwrap();
        assert!(validator::Validate::validate(&req).is_ok());
        assert_eq!(req.idle_timeout_seconds, 300);
        assert_eq!(req.heartbeat_interval_seconds, 60);
    }
}
