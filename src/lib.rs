#![forbid(unsafe_code)]

pub mod app;
pub mod browser;
pub mod cli;
pub mod collect;
pub mod config;
pub mod distill;
pub mod formats;
pub mod freshness;
pub mod incremental;
pub mod logging;
pub mod review_time;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
