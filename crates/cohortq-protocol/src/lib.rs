//! cohortq protocol - shared types for the quota hierarchy
//!
//! Defines the vocabulary every other crate speaks:
//! - Node, flavor and resource identifiers
//! - Quota declarations (resource groups, flavor quotas, limits)
//! - Configuration-source events pushed into the hierarchy

pub mod constants;
pub mod error;
pub mod identity;
pub mod messages;
pub mod types;

pub use constants::*;
pub use error::*;
pub use identity::*;
pub use messages::*;
pub use types::*;
