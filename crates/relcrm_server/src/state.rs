//! Shared handler state.
//!
//! # Invariants
//! - Each request opens its own connection on a blocking worker thread;
//!   SQLite's file lock is the only cross-request coordination.
//! - The codec is built once at startup and never cloned into responses.

use crate::error::ApiError;
use relcrm_core::db::{open_db_with_lock_wait, DbError};
use relcrm_core::service::duplicates::ScanOptions;
use relcrm_core::{
    ClientService, ConfigError, CrmConfig, ErrorCode, FieldCodec, SimilarityScorer,
    SqliteClientRepository, UserId,
};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub db_path: PathBuf,
    pub lock_wait: Duration,
    pub codec: FieldCodec,
    pub scorer: SimilarityScorer,
    pub scan_options: ScanOptions,
}

impl AppState {
    pub fn new(
        db_path: impl Into<PathBuf>,
        lock_wait: Duration,
        codec: FieldCodec,
        scorer: SimilarityScorer,
        scan_options: ScanOptions,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            lock_wait,
            codec,
            scorer,
            scan_options,
        }
    }

    pub fn from_config(config: &CrmConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.database_path.clone(),
            config.lock_wait(),
            config.build_codec()?,
            SimilarityScorer::new(config.scorer_config()),
            config.scan_options(),
        ))
    }

    pub fn repo<'a>(&'a self, conn: &'a Connection, owner: UserId) -> SqliteClientRepository<'a> {
        SqliteClientRepository::new(conn, owner, &self.codec)
    }

    pub fn client_service<'a>(
        &'a self,
        conn: &'a Connection,
        owner: UserId,
    ) -> ClientService<SqliteClientRepository<'a>> {
        ClientService::new(self.repo(conn, owner))
    }

    /// Runs `work` against a fresh connection on the blocking pool.
    pub async fn run<T, F>(self: &Arc<Self>, work: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &AppState) -> Result<T, ApiError> + Send + 'static,
    {
        let state = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let conn = open_db_with_lock_wait(&state.db_path, state.lock_wait).map_err(db_error)?;
            work(&conn, &state)
        })
        .await
        .map_err(ApiError::internal)?
    }
}

fn db_error(err: DbError) -> ApiError {
    if err.is_lock_contention() {
        return ApiError::new(ErrorCode::ConcurrentModification, "database is busy");
    }
    ApiError::internal(err)
}
