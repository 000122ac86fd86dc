//! Core domain logic for relcrm: client relationship records, duplicate
//! detection and merge.
//! This crate is the single source of truth for business invariants.

pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use codec::{CodecError, FieldCodec};
pub use config::{ConfigError, CrmConfig};
pub use error::ErrorCode;
pub use logging::{default_log_level, init_logging, logging_status, LoggingOptions, LoggingStatus};
pub use model::client::{Client, ClientAggregate, ClientDraft, ClientId, ClientSummary, Priority};
pub use model::{UserId, ValidationError};
pub use repo::client_repo::{ClientListQuery, ClientRepository, SqliteClientRepository};
pub use repo::{CrmRepository, EntityKind, RepoError, RepoResult};
pub use service::client_service::{ClientService, ClientServiceError};
pub use service::duplicates::{DuplicateGroup, DuplicateReport, DuplicateScanService};
pub use service::merge::{MergeCoordinator, MergeError, MergeOutcome, MergeRequest};
pub use service::similarity::{MatchReason, SimilarityScorer};
pub use service::timeline::{ActivityStats, TimelineService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
