//! HTTP surface for relcrm.
//!
//! # Responsibility
//! - Expose client records, duplicate detection and merge under `/crm`.
//! - Resolve the caller from `X-User-Id` and map core error codes onto
//!   HTTP statuses.
//!
//! # Invariants
//! - Handlers never touch SQLite on the async executor.
//! - Error bodies are always `{code, message}` JSON.

mod error;
mod extract;
mod routes;
mod state;

pub use error::{status_for, ApiError, ErrorBody};
pub use extract::{CallerId, USER_ID_HEADER};
pub use state::AppState;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info};
use relcrm_core::db::{open_db_with_lock_wait, DbError};
use relcrm_core::{core_version, ConfigError, CrmConfig};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("server I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: core_version(),
    })
}

/// Builds the application router without network-facing layers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(routes::crm_routes())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Local-first CORS: only the bound address and localhost on the same port.
fn cors_layer(addr: SocketAddr) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://{}:{}", addr.ip(), addr.port()),
        format!("http://localhost:{}", addr.port()),
    ]
    .iter()
    .filter_map(|origin| HeaderValue::from_str(origin).ok())
    .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
        ]))
}

/// Migrates the database, binds `bind_address` and serves until Ctrl-C.
pub async fn serve(config: &CrmConfig) -> Result<(), ServerError> {
    let state = Arc::new(AppState::from_config(config)?);
    // Apply migrations once before accepting traffic.
    drop(open_db_with_lock_wait(&state.db_path, state.lock_wait)?);

    let listener = tokio::net::TcpListener::bind(config.bind_address.as_str()).await?;
    let addr = listener.local_addr()?;
    let app = router(state).layer(cors_layer(addr));
    info!("event=server_start module=server status=ok addr={addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("event=server_stop module=server status=ok");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("event=server_signal module=server status=error error={err}");
    }
}
