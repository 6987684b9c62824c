//! cohortq connector - the runnable edge of the quota hierarchy
//!
//! Wires the quota tree to the outside world:
//! - A thread-safe `QuotaCache` shared by schedulers and the sync actor
//! - A configuration sync actor applying out-of-order events with retries
//! - A TOML topology source producing configuration events
//! - TOML/env configuration and logging setup for the binary

pub mod cache;
pub mod config;
pub mod logging;
pub mod sync;
pub mod topology;

pub use cache::QuotaCache;
pub use config::ConnectorConfig;
pub use sync::{ConfigSync, Outcome, SyncHandle, SyncStats};
pub use topology::Topology;
