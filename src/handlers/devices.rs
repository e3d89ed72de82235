//! Device registry handlers

use axum::{extract::{Path, Query, State}, Json};
use serde_json::json;
use uuid::Uuid;
use chrono::Utc;
use validator::Validate;

use crate::{AppState, AppError, AppResult};
use crate::middleware::auth::{hash_token, DeviceContext, UserContext};
use crate::middleware::rbac::{self, Resource, Verb};
use crate::models::{
    ActionKind, ActionResultRequest, AddMemberRequest, AuditLog, CreateGroupRequest,
    Device, DeviceAction, DeviceFilter, DeviceGroup, DeviceStats, DispatchActionRequest,
    Event, HeartbeatRequest, HeartbeatResponse, Incident, NewEvent, RegisterDeviceRequest,
    RegisterDeviceResponse, Severity, UpdateDeviceRequest, transition_events,
};

/// List devices
pub async fn list(
    State(state): State<AppState>,
    user: UserContext,
    Query(filter): Query<DeviceFilter>,
) -> AppResult<Json<Vec<Device>>> {
    rbac::require(&user, Resource::Devices, Verb::Read)?;

    let devices = Device::list(&state.pool, &filter, state.config.offline_after_seconds).await?;
    Ok(Json(devices))
}

/// Register a new device
pub async fn register(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<RegisterDeviceRequest>,
) -> AppResult<Json<RegisterDeviceResponse>> {
    rbac::require(&user, Resource::Devices, Verb::Write)?;
    req.validate()?;

    // Hardware fingerprint: one record per mac+hostname pair
    if let Some(mac) = &req.mac_address {
        if Device::find_by_fingerprint(&state.pool, mac, &req.hostname).await?.is_some() {
            return Err(AppError::Conflict(
                "A device with this MAC address and hostname is already registered".to_string(),
            ));
        }
    }

    let token = Uuid::new_v4().to_string();
    let token_hash = hash_token(&token);

    let device = Device::register(&state.pool, &req, &token_hash).await?;

    Event::record(&state.pool, NewEvent {
        event_type: "device_registered",
        device_id: Some(device.id),
        user_id: Some(user.user_id),
        severity: Severity::Info,
        message: format!("Device {} registered", device.name),
        metadata: json!({}),
        source: "api",
    })
    .await?;

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "device_registered",
        &device.hostname,
        Some(device.id.to_string()),
        json!({"name": device.name}),
    )
    .await;

    tracing::info!("Device registered: {} ({})", device.hostname, device.id);

    Ok(Json(RegisterDeviceResponse { device, token }))
}

/// Get single device
pub async fn get(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Device>> {
    rbac::require(&user, Resource::Devices, Verb::Read)?;

    let device = Device::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;

    Ok(Json(device))
}

/// Update device metadata
pub async fn update(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateDeviceRequest>,
) -> AppResult<Json<Device>> {
    rbac::require(&user, Resource::Devices, Verb::Write)?;
    req.validate()?;

    let device = Device::update_metadata(&state.pool, id, &req)
        .await?
        .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "device_updated",
        &device.hostname,
        Some(device.id.to_string()),
        json!({}),
    )
    .await;

    Ok(Json(device))
}

/// Deactivate a device (devices are never hard-deleted)
pub async fn deactivate(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    rbac::require(&user, Resource::Devices, Verb::Write)?;

    if !Device::deactivate(&state.pool, id).await? {
        return Err(AppError::NotFound("Device not found".to_string()));
    }

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "device_deactivated",
        &id.to_string(),
        Some(id.to_string()),
        json!({}),
    )
    .await;

    Ok(Json(json!({ "deactivated": true })))
}

/// Device fleet statistics
pub async fn stats(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<Json<DeviceStats>> {
    rbac::require(&user, Resource::Devices, Verb::Read)?;

    let stats = Device::stats(&state.pool, state.config.offline_after_seconds).await?;
    Ok(Json(stats))
}

/// Agent heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    agent: DeviceContext,
    Path(id): Path<Uuid>,
    Json(req): Json<HeartbeatRequest>,
) -> AppResult<Json<HeartbeatResponse>> {
    let device = Device::find_by_id(&state.pool, id)
        .await?
        .filter(|d| d.is_active)
        .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;

    // A token only speaks for its own device
    if device.id != agent.device_id {
        return Err(AppError::Forbidden);
    }

    // Prefer the address the proxy saw over what the agent reports
    let mut req = req;
    if req.ip_address.is_none() {
        req.ip_address = agent.ip_address.clone();
    }

    let lock_in_flight = DeviceAction::lock_action_in_flight(&state.pool, device.id).await?;

    Device::apply_heartbeat(&state.pool, device.id, &req).await?;

    let implied = transition_events(
        &device.status,
        device.is_locked,
        req.status,
        req.is_locked,
        lock_in_flight,
    );

    for event in &implied {
        Event::record(&state.pool, NewEvent {
            event_type: event.event_type,
            device_id: Some(device.id),
            user_id: None,
            severity: event.severity,
            message: event.message.clone(),
            metadata: json!({"status": req.status.as_str(), "is_locked": req.is_locked}),
            source: "agent",
        })
        .await?;

        if event.severity.is_incident_grade() {
            let count = Event::count_incident_grade(
                &state.pool,
                device.id,
                state.config.incident_window_minutes,
            )
            .await?;
            Incident::derive_for_device(
                &state.pool,
                device.id,
                count,
                state.config.incident_event_threshold,
                state.config.incident_window_minutes,
            )
            .await?;
        }
    }

    let actions = DeviceAction::take_pending(&state.pool, device.id).await?;

    Ok(Json(HeartbeatResponse {
        server_time: Utc::now().timestamp(),
        actions,
    }))
}

/// Dispatch a remote action for asynchronous pickup by the agent
pub async fn dispatch_action(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<DispatchActionRequest>,
) -> AppResult<Json<DeviceAction>> {
    rbac::require(&user, Resource::Devices, Verb::Write)?;
    req.validate()?;

    let device = Device::find_by_id(&state.pool, id)
        .await?
        .filter(|d| d.is_active)
        .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;

    let action = DeviceAction::create(
        &state.pool,
        device.id,
        req.action,
        Some(user.user_id),
        req.reason.as_deref(),
        req.force,
    )
    .await?;

    // Lock state changes take effect server-side immediately; the agent
    // converges on its next poll.
    match req.action {
        ActionKind::Lock => Device::set_lock_state(&state.pool, device.id, true).await?,
        ActionKind::Unlock => Device::set_lock_state(&state.pool, device.id, false).await?,
        _ => {}
    }

    let severity = if req.action == ActionKind::RestartAgent {
        Severity::Warning
    } else {
        Severity::Info
    };

    Event::record(&state.pool, NewEvent {
        event_type: match req.action {
            ActionKind::Lock => "action_lock_sent",
            ActionKind::Unlock => "action_unlock_sent",
            ActionKind::Screenshot => "action_screenshot_sent",
            ActionKind::RestartAgent => "action_restart_sent",
        },
        device_id: Some(device.id),
        user_id: Some(user.user_id),
        severity,
        message: format!("{} dispatched to {}", req.action.as_str(), device.name),
        metadata: json!({"action_id": action.id, "force": req.force}),
        source: "dashboard",
    })
    .await?;

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "device_action_dispatched",
        &device.hostname,
        Some(device.id.to_string()),
        json!({"action": req.action.as_str(), "reason": req.reason, "force": req.force}),
    )
    .await;

    tracing::info!(
        "Action {} dispatched to device {} by user {}",
        req.action.as_str(), device.id, user.user_id
    );

    Ok(Json(action))
}

/// Action history for a device
pub async fn list_actions(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<DeviceAction>>> {
    rbac::require(&user, Resource::Devices, Verb::Read)?;

    if Device::find_by_id(&state.pool, id).await?.is_none() {
        return Err(AppError::NotFound("Device not found".to_string()));
    }

    let actions = DeviceAction::list_for_device(&state.pool, id, 100).await?;
    Ok(Json(actions))
}

/// Agent reports the outcome of a delivered action
pub async fn report_action_result(
    State(state): State<AppState>,
    agent: DeviceContext,
    Path((id, action_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ActionResultRequest>,
) -> AppResult<Json<DeviceAction>> {
    if id != agent.device_id {
        return Err(AppError::Forbidden);
    }

    let action = DeviceAction::report_result(
        &state.pool,
        action_id,
        agent.device_id,
        req.status,
        req.error.as_deref(),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("Action not found".to_string()))?;

    let failed = action.status == "failed";
    Event::record(&state.pool, NewEvent {
        event_type: if failed { "action_failed" } else { "action_completed" },
        device_id: Some(agent.device_id),
        user_id: None,
        severity: if failed { Severity::Warning } else { Severity::Info },
        message: format!("Action {} {}", action.action_type, action.status),
        metadata: json!({"action_id": action.id, "error": req.error}),
        source: "agent",
    })
    .await?;

    Ok(Json(action))
}

/// List device groups
pub async fn list_groups(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<Json<Vec<DeviceGroup>>> {
    rbac::require(&user, Resource::Devices, Verb::Read)?;

    let groups = DeviceGroup::list(&state.pool).await?;
    Ok(Json(groups))
}

/// Create a device group
pub async fn create_group(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateGroupRequest>,
) -> AppResult<Json<DeviceGroup>> {
    rbac::require(&user, Resource::Devices, Verb::Write)?;
    req.validate()?;

    let group = DeviceGroup::create(&state.pool, &req, user.user_id).await?;

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "group_created",
        &group.name,
        Some(group.id.to_string()),
        json!({}),
    )
    .await;

    Ok(Json(group))
}

/// Remove a device from a group
pub async fn remove_group_member(
    State(state): State<AppState>,
    user: UserContext,
    Path((id, device_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<serde_json::Value>> {
    rbac::require(&user, Resource::Devices, Verb::Write)?;

    let group = DeviceGroup::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Group not found".to_string()))?;

    if !DeviceGroup::remove_member(&state.pool, group.id, device_id).await? {
        return Err(AppError::NotFound("Device is not a member of this group".to_string()));
    }

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "group_member_removed",
        &group.name,
        Some(group.id.to_string()),
        json!({"device_id": device_id}),
    )
    .await;

    Ok(Json(json!({ "removed": true })))
}

/// Add a device to a group
pub async fn add_group_member(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<AddMemberRequest>,
) -> AppResult<Json<serde_json::Value>> {
    rbac::require(&user, Resource::Devices, Verb::Write)?;

    let group = DeviceGroup::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Group not found".to_string()))?;

    let device = Device::find_by_id(&state.pool, req.device_id)
        .await?
        .filter(|d| d.is_active)
        .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;

    DeviceGroup::add_member(&state.pool, group.id, device.id).await?;

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "group_member_added",
        &group.name,
        Some(group.id.to_string()),
        json!({"device_id": device.id}),
    )
    .await;

    Ok(Json(json!({ "added": true })))
}
