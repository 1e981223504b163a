//! Backup upload backends and a self-test harness that checks how each one
//! handles remote save paths.

pub mod api_error;
pub mod config;
pub mod error;
pub mod http_logger;
pub mod logger;
pub mod net;
pub mod path;
pub mod test_run;
pub mod uploaders;
