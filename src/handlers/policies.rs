//! Policy handlers

use axum::{extract::{Path, Query, State}, Json};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{AppState, AppError, AppResult};
use crate::middleware::auth::{DeviceContext, UserContext};
use crate::middleware::rbac::{self, Resource, Verb};
use crate::models::{
    AuditLog, CreateAssignmentRequest, CreatePolicyRequest, Device, DeviceGroup,
    EffectivePolicyResponse, Policy, PolicyAssignment, PolicyFilter, UpdatePolicyRequest,
    resolve_effective,
};

/// List policies
pub async fn list(
    State(state): State<AppState>,
    user: UserContext,
    Query(filter): Query<PolicyFilter>,
) -> AppResult<Json<Vec<Policy>>> {
    rbac::require(&user, Resource::Policies, Verb::Read)?;

    let policies = Policy::list(&state.pool, &filter).await?;
    Ok(Json(policies))
}

/// Get single policy
pub async fn get(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Policy>> {
    rbac::require(&user, Resource::Policies, Verb::Read)?;

    let policy = Policy::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Policy not found".to_string()))?;

    Ok(Json(policy))
}

/// Create new policy
pub async fn create(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreatePolicyRequest>,
) -> AppResult<Json<Policy>> {
    rbac::require(&user, Resource::Policies, Verb::Write)?;
    req.validate()?;

    let policy = Policy::create(&state.pool, &req, user.user_id).await?;

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "policy_created",
        &policy.name,
        Some(policy.id.to_string()),
        json!({"scope": policy.scope, "priority": policy.priority}),
    )
    .await;

    tracing::info!("Policy created: {} ({})", policy.name, policy.id);

    Ok(Json(policy))
}

/// Update policy
pub async fn update(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePolicyRequest>,
) -> AppResult<Json<Policy>> {
    rbac::require(&user, Resource::Policies, Verb::Write)?;
    req.validate()?;

    let policy = Policy::update(&state.pool, id, &req)
        .await?
        .ok_or_else(|| AppError::NotFound("Policy not found".to_string()))?;

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "policy_updated",
        &policy.name,
        Some(policy.id.to_string()),
        json!({}),
    )
    .await;

    Ok(Json(policy))
}

/// List policy assignments
pub async fn list_assignments(
    State(state): State<AppState>,
    user: UserContext,
    Query(query): Query<AssignmentQuery>,
) -> AppResult<Json<Vec<PolicyAssignment>>> {
    rbac::require(&user, Resource::Policies, Verb::Read)?;

    let assignments = PolicyAssignment::list(&state.pool, query.policy_id).await?;
    Ok(Json(assignments))
}

#[derive(Debug, serde::Deserialize)]
pub struct AssignmentQuery {
    pub policy_id: Option<Uuid>,
}

/// Bind a device- or group-scoped policy to its target
pub async fn create_assignment(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateAssignmentRequest>,
) -> AppResult<Json<PolicyAssignment>> {
    rbac::require(&user, Resource::Policies, Verb::Write)?;

    let policy = Policy::find_by_id(&state.pool, req.policy_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Policy not found".to_string()))?;

    match (policy.scope.as_str(), req.device_id, req.group_id) {
        ("device", Some(device_id), None) => {
            Device::find_by_id(&state.pool, device_id)
                .await?
                .filter(|d| d.is_active)
                .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;
        }
        ("group", None, Some(group_id)) => {
            DeviceGroup::find_by_id(&state.pool, group_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Group not found".to_string()))?;
        }
        ("global", _, _) => {
            return Err(AppError::ValidationError(
                "Global policies apply everywhere and take no assignment".to_string(),
            ));
        }
        _ => {
            return Err(AppError::ValidationError(
                "Assignment target must match the policy scope".to_string(),
            ));
        }
    }

    let assignment = PolicyAssignment::create(&state.pool, &req, user.user_id).await?;

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "policy_assigned",
        &policy.name,
        Some(policy.id.to_string()),
        json!({"device_id": req.device_id, "group_id": req.group_id}),
    )
    .await;

    Ok(Json(assignment))
}

/// Resolve the effective policy for a device
pub async fn effective_for_device(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EffectivePolicyResponse>> {
    rbac::require(&user, Resource::Policies, Verb::Read)?;

    let device = Device::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;

    Ok(Json(resolve_for(&state, device.id).await?))
}

/// The authenticated agent's own effective policy
pub async fn effective_for_agent(
    State(state): State<AppState>,
    agent: DeviceContext,
) -> AppResult<Json<Policy>> {
    let resolved = resolve_for(&state, agent.device_id).await?;
    Ok(Json(resolved.effective_policy))
}

async fn resolve_for(state: &AppState, device_id: Uuid) -> AppResult<EffectivePolicyResponse> {
    let candidates = Policy::candidates_for_device(&state.pool, device_id).await?;
    let applied = candidates.clone();
    let effective = resolve_effective(candidates);

    Ok(EffectivePolicyResponse {
        device_id,
        effective_policy: effective,
        applied_policies: applied,
    })
}
