//! Persistence Gateway (spec.md §4.4): exactly the seven operations the
//! Orchestrator and Reconciler need, split across two repositories the way
//! `crate::db::handlers` in the teacher splits storage per entity.
//!
//! Repositories are constructed from a `&mut PgConnection` (borrowed from a
//! pool connection or an open transaction), never from the pool directly,
//! matching the teacher's "always go through a transaction" convention.

pub mod request_info;
pub mod success_step;

pub use request_info::RequestInfoRepo;
pub use success_step::SuccessStepRepo;
