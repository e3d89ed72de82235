//! DeskGuard Cloud Backend Server
//!
//! Central management server for DeskGuard Windows lock agents.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DESKGUARD CLOUD                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────┐  ┌─────────────────────────┐ │
//! │  │  API      │  │  Auth     │  │  Background Sweeps      │ │
//! │  │  Gateway  │  │  Gate     │  │  (offline / action TTL) │ │
//! │  │  (Axum)   │  │  (JWT)    │  │                         │ │
//! │  └─────┬─────┘  └─────┬─────┘  └────────────┬────────────┘ │
//! │        └──────────────┼──────────────────────┘              │
//! │                       ▼                                     │
//! │                ┌─────────────┐                             │
//! │                │ PostgreSQL  │                             │
//! │                └─────────────┘                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod db;
mod models;
mod handlers;
mod middleware;
mod error;
mod tasks;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post, put, delete},
    middleware as axum_middleware,
};
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::net::SocketAddr;

pub use error::{AppError, AppResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "deskguard_cloud=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    tracing::info!("DeskGuard Cloud Server starting...");
    tracing::info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));

    // Initialize database pool
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    // First boot on an empty database gets a superadmin
    handlers::auth::ensure_bootstrap_admin(&pool, &config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bootstrap admin user: {}", e))?;

    // Build application state
    let state = AppState {
        pool,
        config: config.clone(),
    };

    // Periodic offline / action-TTL sweeps
    tasks::spawn_sweeps(state.clone());

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🚀 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind listener")?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: config::Config,
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::check))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/refresh", post(handlers::auth::refresh));

    // Agent routes (device token auth)
    let agent_routes = Router::new()
        .route("/api/devices/:id/heartbeat", post(handlers::devices::heartbeat))
        .route("/api/devices/:id/actions/:action_id/result", post(handlers::devices::report_action_result))
        .route("/api/agent/policy", get(handlers::policies::effective_for_agent))
        .route("/api/agent/screenshots", post(handlers::forensics::store_screenshot))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_device_auth
        ));

    // Management routes (user JWT auth)
    let management_routes = Router::new()
        // Account
        .route("/api/auth/profile", get(handlers::auth::profile))
        .route("/api/auth/profile", put(handlers::auth::update_profile))
        .route("/api/auth/users", get(handlers::auth::list_users))
        .route("/api/auth/users", post(handlers::auth::create_user))
        .route("/api/auth/users/:id", put(handlers::auth::update_user))

        // Devices
        .route("/api/devices", get(handlers::devices::list))
        .route("/api/devices", post(handlers::devices::register))
        .route("/api/devices/stats", get(handlers::devices::stats))
        .route("/api/devices/groups", get(handlers::devices::list_groups))
        .route("/api/devices/groups", post(handlers::devices::create_group))
        .route("/api/devices/groups/:id/members", post(handlers::devices::add_group_member))
        .route("/api/devices/groups/:id/members/:device_id", delete(handlers::devices::remove_group_member))
        .route("/api/devices/:id", get(handlers::devices::get))
        .route("/api/devices/:id", put(handlers::devices::update))
        .route("/api/devices/:id", delete(handlers::devices::deactivate))
        .route("/api/devices/:id/action", post(handlers::devices::dispatch_action))
        .route("/api/devices/:id/actions", get(handlers::devices::list_actions))

        // Policies
        .route("/api/policies", get(handlers::policies::list))
        .route("/api/policies", post(handlers::policies::create))
        .route("/api/policies/assignments", get(handlers::policies::list_assignments))
        .route("/api/policies/assignments", post(handlers::policies::create_assignment))
        .route("/api/policies/device/:id", get(handlers::policies::effective_for_device))
        .route("/api/policies/:id", get(handlers::policies::get))
        .route("/api/policies/:id", put(handlers::policies::update))

        // Events & incidents
        .route("/api/events", get(handlers::events::list))
        .route("/api/events/stats", get(handlers::events::stats))
        .route("/api/events/incidents", get(handlers::events::list_incidents))
        .route("/api/events/incidents", post(handlers::events::create_incident))
        .route("/api/events/incidents/:id", get(handlers::events::get_incident))
        .route("/api/events/incidents/:id/status", put(handlers::events::update_incident_status))

        // Forensics
        .route("/api/forensics/screenshots", get(handlers::forensics::list_screenshots))
        .route("/api/forensics/audit-logs", get(handlers::forensics::list_audit_logs))

        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_user_auth
        ));

    // Combine all routes
    Router::new()
        .merge(public_routes)
        .merge(agent_routes)
        .merge(management_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}
