//! Database record structures matching the `request_info` and `success_step`
//! table schemas (spec.md §3).

pub mod request_info;
pub mod success_step;

pub use request_info::RequestInfo;
pub use success_step::SuccessStep;
