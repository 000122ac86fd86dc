//! Service layer for CRM use-cases.
//!
//! # Responsibility
//! - Coordinate repository calls into user-facing operations.
//! - Keep matching, grouping and merge planning testable without storage.

pub mod client_service;
pub mod duplicates;
pub mod merge;
pub mod similarity;
pub mod timeline;
