//! # leadflow-store
//!
//! `SQLite` persistence for leadflow.
//!
//! - **Connection pool**: `r2d2` over `rusqlite` with WAL journaling, a busy
//!   timeout and foreign keys
//! - **Migrations**: embedded, version-tracked schema
//! - **Repositories**: stateless functions over a `&Connection` for contacts,
//!   users, rules, assignments and the audit trail
//! - **[`Store`]**: pool owner that runs units of work in immediate
//!   transactions
//!
//! The schema enforces two invariants on its own: a contact has at most one
//! open assignment (partial unique index), and `assignment_history` and
//! `lifecycle_events` reject updates and deletes (triggers).

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod repo;
pub mod store;
pub mod types;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection};
pub use errors::{Result, StoreError};
pub use repo::{
    AssignmentRepo, AssignmentRuleRepo, AuditRepo, ContactRepo, ScoringRuleRepo,
    TransitionRuleRepo, UserRepo,
};
pub use store::Store;
pub use types::*;
