//! Run orchestration: status tracking, the bounded worker queue, the runner
//! and the service facade used by both binaries.

pub mod queue;
pub mod runner;
pub mod service;
pub mod status;
