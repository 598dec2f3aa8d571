//! Persistence layer: SQLx over PostgreSQL, Repository-shaped (spec.md §4.4).
//!
//! ```text
//! Orchestrator / Reconciler
//!          |
//!          v
//!   db::handlers   (queries, status-machine guards)
//!          |
//!          v
//!   db::models      (row structs matching table schemas)
//!          |
//!          v
//!     PostgreSQL
//! ```
//!
//! Repositories borrow a `&mut PgConnection`; callers open a transaction with
//! `pool.begin()` for anything that must be atomic (insert request + later
//! batch-insert steps are separate transactions, matching spec.md §4.3's
//! "insert succeeds or fails on its own" step boundary).

pub mod errors;
pub mod handlers;
pub mod models;
