//! Background sweeps
//!
//! Idempotent batch jobs safe to run on any cadence: stale devices are
//! swept to offline and undelivered actions expire after their TTL.

use std::time::Duration;

use serde_json::json;

use crate::AppState;
use crate::models::{DeviceAction, Event, Incident, NewEvent, Severity};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub fn spawn_sweeps(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;

            if let Err(e) = offline_sweep(&state).await {
                tracing::warn!("Offline sweep failed: {}", e);
            }
            if let Err(e) = action_ttl_sweep(&state).await {
                tracing::warn!("Action TTL sweep failed: {}", e);
            }
            if let Err(e) = incident_sweep(&state).await {
                tracing::warn!("Incident sweep failed: {}", e);
            }
        }
    });
}

/// Mark devices offline once their heartbeats go stale, one event per transition
async fn offline_sweep(state: &AppState) -> Result<(), sqlx::Error> {
    let swept = sqlx::query_as::<_, (uuid::Uuid, String)>(
        r#"
        UPDATE devices
        SET status = 'offline', updated_at = NOW()
        WHERE is_active = true
          AND status IN ('online', 'unlocked')
          AND (last_seen IS NULL OR last_seen < NOW() - $1 * INTERVAL '1 second')
        RETURNING id, name
        "#
    )
    .bind(state.config.offline_after_seconds as f64)
    .fetch_all(&state.pool)
    .await?;

    for (device_id, name) in swept {
        Event::record(&state.pool, NewEvent {
            event_type: "state_change",
            device_id: Some(device_id),
            user_id: None,
            severity: Severity::Info,
            message: format!("Device {} marked offline after missed heartbeats", name),
            metadata: json!({"swept": true}),
            source: "server",
        })
        .await?;
    }

    Ok(())
}

async fn action_ttl_sweep(state: &AppState) -> Result<(), sqlx::Error> {
    let expired = DeviceAction::expire_stale(&state.pool, state.config.action_ttl_minutes).await?;
    if !expired.is_empty() {
        tracing::info!("Expired {} undelivered device actions", expired.len());
    }
    Ok(())
}

/// Recompute incident derivation across the fleet
async fn incident_sweep(state: &AppState) -> Result<(), sqlx::Error> {
    let over_threshold = sqlx::query_as::<_, (uuid::Uuid, i64)>(
        r#"
        SELECT device_id, COUNT(*) FROM events
        WHERE device_id IS NOT NULL
          AND severity IN ('error', 'critical')
          AND created_at > NOW() - $1 * INTERVAL '1 minute'
        GROUP BY device_id
        HAVING COUNT(*) >= $2
        "#
    )
    .bind(state.config.incident_window_minutes as f64)
    .bind(state.config.incident_event_threshold)
    .fetch_all(&state.pool)
    .await?;

    for (device_id, count) in over_threshold {
        Incident::derive_for_device(
            &state.pool,
            device_id,
            count,
            state.config.incident_event_threshold,
            state.config.incident_window_minutes,
        )
        .await?;
    }

    Ok(())
}
