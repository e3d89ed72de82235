//! Forensics handlers - screenshots and audit trail

use axum::{extract::{Query, State}, Json};
use serde_json::json;
use chrono::{Datelike, Utc};
use uuid::Uuid;

use crate::{AppState, AppError, AppResult};
use crate::middleware::auth::{DeviceContext, UserContext};
use crate::middleware::rbac::{self, Resource, Verb};
use crate::models::{
    AuditFilter, AuditLog, Screenshot, ScreenshotFilter, StoreScreenshotRequest,
    screenshot::{content_hash, decode_payload},
};

/// List screenshots
pub async fn list_screenshots(
    State(state): State<AppState>,
    user: UserContext,
    Query(filter): Query<ScreenshotFilter>,
) -> AppResult<Json<Vec<Screenshot>>> {
    rbac::require(&user, Resource::Forensics, Verb::Read)?;

    let screenshots = Screenshot::list(&state.pool, &filter).await?;
    Ok(Json(screenshots))
}

/// Agent uploads a captured screenshot
pub async fn store_screenshot(
    State(state): State<AppState>,
    agent: DeviceContext,
    Json(req): Json<StoreScreenshotRequest>,
) -> AppResult<Json<Screenshot>> {
    let bytes = decode_payload(&req.data, state.config.max_screenshot_bytes)?;
    let hash = content_hash(&bytes);

    let captured_at = req.captured_at.unwrap_or_else(Utc::now);
    let id = Uuid::new_v4();
    let file_name = req
        .file_name
        .unwrap_or_else(|| format!("screenshot_{}_{}.png", agent.hostname, captured_at.timestamp()));

    // Blobs land on disk partitioned by capture date; the row keeps the reference
    let dir = format!(
        "{}/{:04}/{:02}/{:02}",
        state.config.screenshot_dir,
        captured_at.year(),
        captured_at.month(),
        captured_at.day()
    );
    let file_path = format!("{}/{}.png", dir, id);

    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to create screenshot dir: {}", e)))?;
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to write screenshot: {}", e)))?;

    let screenshot = Screenshot::store(
        &state.pool,
        agent.device_id,
        req.event_id,
        None,
        captured_at,
        &file_name,
        &file_path,
        &hash,
        bytes.len() as i64,
        req.metadata.unwrap_or_else(|| json!({})),
    )
    .await?;

    AuditLog::record(
        &state.pool,
        None,
        "screenshot_stored",
        &agent.hostname,
        Some(agent.device_id.to_string()),
        json!({"screenshot_id": screenshot.id, "size": screenshot.file_size}),
    )
    .await;

    tracing::debug!("Screenshot stored for device {}: {}", agent.device_id, screenshot.id);

    Ok(Json(screenshot))
}

/// List audit log entries
pub async fn list_audit_logs(
    State(state): State<AppState>,
    user: UserContext,
    Query(filter): Query<AuditFilter>,
) -> AppResult<Json<Vec<AuditLog>>> {
    rbac::require(&user, Resource::AuditLogs, Verb::Read)?;

    let entries = AuditLog::list(&state.pool, &filter).await?;
    Ok(Json(entries))
}
