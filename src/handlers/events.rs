//! Event and incident handlers

use axum::{extract::{Path, Query, State}, Json};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{AppState, AppError, AppResult};
use crate::middleware::auth::UserContext;
use crate::middleware::rbac::{self, Resource, Verb};
use crate::models::{
    AuditLog, CreateIncidentRequest, Device, Event, EventFilter, EventStats,
    Incident, IncidentFilter, UpdateIncidentStatusRequest,
};

/// List events
pub async fn list(
    State(state): State<AppState>,
    user: UserContext,
    Query(filter): Query<EventFilter>,
) -> AppResult<Json<Vec<Event>>> {
    rbac::require(&user, Resource::Events, Verb::Read)?;

    let events = Event::list(&state.pool, &filter).await?;
    Ok(Json(events))
}

/// Aggregate event statistics
pub async fn stats(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<Json<EventStats>> {
    rbac::require(&user, Resource::Events, Verb::Read)?;

    let stats = Event::stats(&state.pool).await?;
    Ok(Json(stats))
}

/// List security incidents
pub async fn list_incidents(
    State(state): State<AppState>,
    user: UserContext,
    Query(filter): Query<IncidentFilter>,
) -> AppResult<Json<Vec<Incident>>> {
    rbac::require(&user, Resource::Incidents, Verb::Read)?;

    let incidents = Incident::list(&state.pool, &filter).await?;
    Ok(Json(incidents))
}

/// Get single incident
pub async fn get_incident(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Incident>> {
    rbac::require(&user, Resource::Incidents, Verb::Read)?;

    let incident = Incident::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Incident not found".to_string()))?;

    Ok(Json(incident))
}

/// File an incident manually
pub async fn create_incident(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateIncidentRequest>,
) -> AppResult<Json<Incident>> {
    rbac::require(&user, Resource::Incidents, Verb::Write)?;
    req.validate()?;

    Device::find_by_id(&state.pool, req.device_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Device not found".to_string()))?;

    let incident = Incident::create(&state.pool, &req).await?;

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "incident_created",
        &incident.title,
        Some(incident.id.to_string()),
        json!({"device_id": incident.device_id, "severity": incident.severity}),
    )
    .await;

    tracing::info!("Incident filed: {} ({})", incident.title, incident.id);

    Ok(Json(incident))
}

/// Triage: update incident status
pub async fn update_incident_status(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateIncidentStatusRequest>,
) -> AppResult<Json<Incident>> {
    rbac::require(&user, Resource::Incidents, Verb::Write)?;

    let incident = Incident::update_status(&state.pool, id, req.status, req.assigned_to)
        .await?
        .ok_or_else(|| AppError::NotFound("Incident not found".to_string()))?;

    AuditLog::record(
        &state.pool,
        Some(user.user_id),
        "incident_updated",
        &incident.title,
        Some(incident.id.to_string()),
        json!({"status": incident.status}),
    )
    .await;

    Ok(Json(incident))
}
