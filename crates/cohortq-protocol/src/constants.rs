/// Fair-share weight assigned to a queue that does not declare one.
pub const DEFAULT_FAIR_SHARE_WEIGHT: f64 = 1.0;

/// Flavor name used by topologies that only declare a single flavor.
pub const DEFAULT_FLAVOR: &str = "default";

/// Largest nominal quota a single queue may declare. Borrowing and
/// lending limits are not bounded; a very large borrowing limit reads as
/// unlimited.
pub const MAX_NOMINAL_QUOTA: i64 = 1 << 53;

/// Maximum number of ancestors walked before a path is declared cyclic.
/// Any well-formed hierarchy is far shallower than this.
pub const MAX_HIERARCHY_DEPTH: usize = 1024;

/// Maximum number of configuration events parked while waiting for a
/// parent to appear.
pub const DEFAULT_MAX_PENDING_EVENTS: usize = 1024;

/// Capacity of the configuration event channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "COHORTQ_";
