//! Dominant-resource fair share.
//!
//! A queue's dominant share is its largest `usage / effective_capacity`
//! ratio over the pairs it declares. Dividing by the queue's weight gives
//! its rank: lower ranks are entitled to surplus capacity first.

use std::cmp::Ordering;

use cohortq_protocol::{FlavorResource, NodeId, Quantity};
use serde::Serialize;

/// A queue's position in the fair-sharing order.
///
/// Ordered by `value` (total order on `f64`), ties broken by queue id so
/// that sorting is deterministic.
#[derive(Debug, Clone, Serialize)]
pub struct FairShareRank {
    pub queue: NodeId,
    pub value: f64,
    /// The pair that produced the dominant share, if anything is in use.
    pub dominant: Option<FlavorResource>,
}

impl PartialEq for FairShareRank {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FairShareRank {}

impl PartialOrd for FairShareRank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FairShareRank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .total_cmp(&other.value)
            .then_with(|| self.queue.cmp(&other.queue))
    }
}

/// Share of one pair: 0 when idle, `+inf` when something is used of a
/// zero capacity.
pub fn resource_share(usage: Quantity, capacity: Quantity) -> f64 {
    if usage <= 0 {
        0.0
    } else if capacity <= 0 {
        f64::INFINITY
    } else {
        usage as f64 / capacity as f64
    }
}

/// The largest share over `(pair, usage, capacity)` entries, with the pair
/// that produced it. Ties keep the first pair seen.
pub fn dominant_share<I>(entries: I) -> (f64, Option<FlavorResource>)
where
    I: IntoIterator<Item = (FlavorResource, Quantity, Quantity)>,
{
    let mut best = (0.0, None);
    for (fr, usage, capacity) in entries {
        let share = resource_share(usage, capacity);
        if share > best.0 {
            best = (share, Some(fr));
        }
    }
    best
}

/// Divide a share by the queue's weight. A zero weight ranks last.
pub fn weighted_share(share: f64, weight: f64) -> f64 {
    if weight <= 0.0 {
        f64::INFINITY
    } else {
        share / weight
    }
}
