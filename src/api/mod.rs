// 🌐 REST API - axum router mounted under /api
//
// One SQLite connection behind a mutex. Handlers lock it, run their
// (blocking) queries and release it before returning.

pub mod auth;
mod contracts;
mod directory;
mod payments;
mod reports;

use crate::config::Config;
use crate::db::record_event;
use crate::error::{AkigError, Result};
use crate::services::auth::AuthKeys;
use auth::AuthUser;
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: Arc<Config>,
    pub keys: AuthKeys,
}

impl AppState {
    pub fn new(conn: Connection, config: Config) -> Result<Self> {
        let keys = AuthKeys::from_config(&config)?;
        Ok(AppState {
            db: Arc::new(Mutex::new(conn)),
            config: Arc::new(config),
            keys,
        })
    }

    /// Lock the connection. A handler that panicked mid-request already had
    /// its transaction rolled back on drop, so a poisoned lock is reused.
    pub fn db(&self) -> Result<MutexGuard<'_, Connection>> {
        Ok(self.db.lock().unwrap_or_else(|poisoned| {
            warn!("database lock was poisoned by a panicking request, recovering");
            self.db.clear_poison();
            poisoned.into_inner()
        }))
    }
}

/// API Response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

pub type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, AkigError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

pub type Created<T> = std::result::Result<(StatusCode, Json<ApiResponse<T>>), AkigError>;

pub fn created<T>(data: T) -> Created<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(data))))
}

/// Run a write and its audit event in one transaction
pub(crate) fn audited<T>(
    conn: &Connection,
    user: &AuthUser,
    event_type: &str,
    entity_type: &str,
    write: impl FnOnce(&Connection) -> Result<T>,
    describe: impl FnOnce(&T) -> (i64, serde_json::Value),
) -> Result<T> {
    let tx = conn.unchecked_transaction()?;
    let value = write(&tx)?;
    let (entity_id, data) = describe(&value);
    record_event(&tx, event_type, entity_type, entity_id, data, &user.actor())?;
    tx.commit()?;
    Ok(value)
}

/// GET /api/health
async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl IntoResponse {
    let database = state
        .db()
        .and_then(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
        .is_ok();
    Json(ApiResponse::ok(serde_json::json!({
        "status": if database { "ok" } else { "degraded" },
        "database": database,
        "version": crate::VERSION,
    })))
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("idempotency-key"),
            header::HeaderName::from_static("x-filename"),
        ])
        .max_age(Duration::from_secs(60 * 60));

    if origin == "*" {
        return cors.allow_origin(Any);
    }
    match HeaderValue::from_str(origin) {
        // cookies need an explicit origin
        Ok(value) => cors.allow_origin(value).allow_credentials(true),
        Err(_) => {
            warn!(origin, "invalid CORS_ORIGIN, falling back to any origin");
            cors.allow_origin(Any)
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        // auth
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        // directory
        .route("/agency", get(directory::get_agency).put(directory::update_agency))
        .route("/tenants", get(directory::list_tenants).post(directory::create_tenant))
        .route(
            "/tenants/:id",
            get(directory::get_tenant)
                .put(directory::update_tenant)
                .delete(directory::deactivate_tenant),
        )
        .route("/tenants/:id/risk", get(directory::tenant_risk))
        .route(
            "/properties",
            get(directory::list_properties).post(directory::create_property),
        )
        .route("/properties/:id", get(directory::get_property))
        .route("/owners", get(directory::list_owners).post(directory::create_owner))
        .route("/owners/:id", get(directory::get_owner))
        .route("/owners/:id/statement", get(directory::owner_statement))
        // contracts & documents
        .route(
            "/contracts",
            get(contracts::list_contracts).post(contracts::create_contract),
        )
        .route("/contracts/:id", get(contracts::get_contract))
        .route("/contracts/:id/terminate", post(contracts::terminate_contract))
        .route("/contracts/:id/render", get(contracts::render_contract))
        .route("/contracts/:id/history", get(contracts::contract_history))
        .route(
            "/templates",
            get(contracts::list_templates).post(contracts::create_template),
        )
        .route(
            "/templates/:id",
            get(contracts::get_template)
                .put(contracts::update_template)
                .delete(contracts::delete_template),
        )
        .route(
            "/disputes",
            get(contracts::list_disputes).post(contracts::create_dispute),
        )
        .route("/disputes/:id", get(contracts::get_dispute))
        .route("/disputes/:id/status", post(contracts::update_dispute_status))
        .route("/disputes/:id/decision", post(contracts::record_decision))
        .route(
            "/deposits",
            get(contracts::list_deposits).post(contracts::register_deposit),
        )
        .route("/deposits/:id", get(contracts::get_deposit))
        .route("/deposits/:id/deduct", post(contracts::deduct_deposit))
        .route("/deposits/:id/return", post(contracts::return_deposit))
        // payments
        .route(
            "/payments",
            get(payments::list_payments).post(payments::create_payment),
        )
        .route("/payments/stats", get(payments::payment_stats))
        .route("/payments/overdue", get(payments::overdue_payments))
        .route("/payments/duplicates", get(payments::duplicate_payments))
        .route(
            "/payments/:id",
            get(payments::get_payment).delete(payments::delete_payment),
        )
        .route("/payments/:id/confirm", post(payments::confirm_payment))
        .route("/payments/:id/fail", post(payments::fail_payment))
        .route("/payments/:id/history", get(payments::payment_history))
        .route("/imports", get(payments::list_imports))
        .route("/imports/csv", post(payments::import_csv))
        .route("/imports/json", post(payments::import_json))
        .route("/imports/:id", get(payments::get_import))
        .route("/arrears", get(payments::list_arrears))
        .route("/arrears/recompute", post(payments::recompute_arrears))
        .route("/arrears/plan", post(payments::payment_plan))
        // reports & follow-up
        .route("/reports/dashboard", get(reports::dashboard))
        .route("/reports/monthly", get(reports::monthly))
        .route("/reports/risk", get(reports::risk_overview))
        .route("/notifications", get(reports::list_notifications))
        .route("/notifications/generate", post(reports::generate_notifications))
        .route("/notifications/:id/sent", post(reports::mark_notification_sent));

    let cors = cors_layer(&state.config.cors_origin);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind, serve, and stop cleanly on Ctrl+C or SIGTERM
pub async fn serve(state: AppState) -> std::io::Result<()> {
    let address = format!("0.0.0.0:{}", state.config.port);
    let app = router(state);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
