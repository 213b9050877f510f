//! Application startup and lifecycle management.

use crate::config::BillingConfig;
use crate::handlers::{checkout, health, intake, reports};
use crate::services::{init_metrics, BillingStore, Database};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BillingStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }
}

/// Every HTTP route the service exposes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_handler))
        .route("/patients", post(intake::create_patient))
        .route("/doctors", post(intake::create_doctor))
        .route("/doctors/:doctor_id/rate-periods", post(intake::add_rate_period))
        .route("/visits", post(intake::create_visit))
        .route(
            "/patients/:patient_id/outstanding",
            get(checkout::get_outstanding),
        )
        .route(
            "/patients/:patient_id/auto-allocation",
            post(checkout::suggest_allocation),
        )
        .route(
            "/patients/:patient_id/payments",
            post(checkout::record_payment),
        )
        .route("/payments/:payment_id", delete(checkout::delete_payment))
        .route("/visits/:visit_id/ledger", get(checkout::get_visit_ledger))
        .route(
            "/visits/:visit_id/waterfall",
            get(reports::get_visit_waterfall),
        )
        .route(
            "/visits/:visit_id/sufficiency",
            get(reports::get_chain_sufficiency),
        )
        .route("/reports/commission", get(reports::get_commission_report))
        .route(
            "/reports/commission.csv",
            get(reports::export_commission_csv),
        )
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
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

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let state = AppState::new(Arc::new(db));

        let http_addr = format!("{}:{}", config.common.host, config.common.port);
        let http_listener = TcpListener::bind(&http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Clinic billing listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let http_router = router(self.state);

        tracing::info!(
            service = "clinic-billing-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, http_router)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
