//! Application startup and lifecycle management.

use crate::config::MembershipConfig;
use crate::error::BillingError;
use crate::services::{
    get_metrics, init_metrics, BillingEngine, Database, DeviceSync, DisabledCollaborator,
    Dispatcher, HttpDeviceSync, HttpNotifier, Notifier, RetryConfig,
};
use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: MembershipConfig,
    pub db: Arc<Database>,
    pub engine: Arc<BillingEngine>,
}

/// Propagate or mint an `x-request-id` on every request and response.
async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    let mut response = next.run(req).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Health check endpoint for liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": state.config.service_name,
                    "version": state.config.service_version,
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": state.config.service_name,
                    "error": e.to_string()
                })),
            )
        }
    }
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Collaborator clients for the configured URLs. Unset URLs are disabled.
pub fn build_dispatcher(config: &MembershipConfig) -> Result<Dispatcher, BillingError> {
    let timeout = Duration::from_secs(config.collaborators.request_timeout_secs);

    let notifier: Arc<dyn Notifier> = match &config.collaborators.notification_service_url {
        Some(url) => Arc::new(HttpNotifier::new(url, timeout)?),
        None => {
            tracing::info!("Notification service URL not configured - notifications disabled");
            Arc::new(DisabledCollaborator)
        }
    };
    let devices: Arc<dyn DeviceSync> = match &config.collaborators.device_sync_url {
        Some(url) => Arc::new(HttpDeviceSync::new(url, timeout)?),
        None => {
            tracing::info!("Device sync URL not configured - device sync disabled");
            Arc::new(DisabledCollaborator)
        }
    };

    Ok(Dispatcher::new(notifier, devices))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    pub async fn build(config: MembershipConfig) -> Result<Self, BillingError> {
        Self::build_internal(config, true).await
    }

    /// Build without running migrations, for tests whose harness applied them.
    pub async fn build_without_migrations(config: MembershipConfig) -> Result<Self, BillingError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: MembershipConfig,
        run_migrations: bool,
    ) -> Result<Self, BillingError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let dispatcher = build_dispatcher(&config)?;
        let engine = BillingEngine::new(
            db.clone(),
            dispatcher,
            RetryConfig::with_max_retries(config.workflow.max_retries),
        );

        let state = AppState {
            config: config.clone(),
            db: Arc::new(db),
            engine: Arc::new(engine),
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            BillingError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Membership service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn engine(&self) -> Arc<BillingEngine> {
        self.state.engine.clone()
    }

    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(state)
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = Self::router(self.state.clone());

        tracing::info!(
            service = %self.state.config.service_name,
            version = %self.state.config.service_version,
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
