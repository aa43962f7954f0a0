//! Shared types for livequery: errors, configuration, table sets and the
//! table change notification seam consumed by the cache.

pub mod config;
pub mod error;
pub mod logging;
pub mod tables;
pub mod tracker;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use tables::*;
pub use tracker::*;
