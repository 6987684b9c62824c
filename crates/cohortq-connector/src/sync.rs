//! Configuration sync actor.
//!
//! Consumes configuration events from a channel and applies them to the
//! quota cache. Events may arrive in any order:
//! - An upsert naming a parent that does not exist yet is parked and
//!   retried after every later event that changes the tree.
//! - Deleting a cohort that still has children marks it pending deletion;
//!   it is removed once its last child leaves.
//! - Deleting an unknown node is a no-op (and discards any parked upsert
//!   for it).
//! - An event that applies supersedes any parked event for the same node.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, RwLock};

use cohortq_hierarchy::HierarchyError;
use cohortq_protocol::{ConfigEvent, EventEnvelope, NodeId, NodeKind};
use cohortq_quota::{Change, QuotaError};

use crate::cache::QuotaCache;
use crate::config::SyncConfig;
use crate::topology::Topology;

/// Counters describing what the actor has done so far.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub started_at: DateTime<Utc>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub received: u64,
    /// Events that changed the tree.
    pub applied: u64,
    /// Events that were already reflected in the tree.
    pub unchanged: u64,
    /// Events refused for reasons retrying cannot fix.
    pub rejected: u64,
    /// Events dropped because too many were already parked.
    pub dropped: u64,
    /// Events currently parked waiting for a parent.
    pub parked: usize,
    /// Cohorts currently pending deletion.
    pub pending_deletions: usize,
}

impl SyncStats {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            last_event_at: None,
            received: 0,
            applied: 0,
            unchanged: 0,
            rejected: 0,
            dropped: 0,
            parked: 0,
            pending_deletions: 0,
        }
    }
}

/// How an event left the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Upserted(Change),
    Deleted(NodeKind),
    PendingDeletion,
    AlreadyAbsent,
}

impl Outcome {
    fn changed(self) -> bool {
        !matches!(
            self,
            Outcome::Upserted(Change::Unchanged) | Outcome::AlreadyAbsent
        )
    }
}

enum Command {
    Event(ConfigEvent),
    Flush(oneshot::Sender<SyncStats>),
}

/// Sending side of the actor.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Command>,
    stats: Arc<RwLock<SyncStats>>,
}

impl SyncHandle {
    pub async fn send(&self, event: ConfigEvent) -> Result<(), anyhow::Error> {
        self.tx
            .send(Command::Event(event))
            .await
            .map_err(|_| anyhow::anyhow!("Config sync actor has stopped"))
    }

    /// Wait until every event sent before this call has been processed.
    pub async fn flush(&self) -> Result<SyncStats, anyhow::Error> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(tx))
            .await
            .map_err(|_| anyhow::anyhow!("Config sync actor has stopped"))?;
        Ok(rx.await?)
    }

    pub async fn stats(&self) -> SyncStats {
        self.stats.read().await.clone()
    }

    /// Send the events turning `previous` into `next`. Returns how many
    /// were sent; 0 when the topologies are equal.
    pub async fn push_topology(&self, previous: &Topology, next: &Topology) -> Result<usize, anyhow::Error> {
        if previous == next {
            return Ok(0);
        }
        let events = next.diff(previous);
        let count = events.len();
        for event in events {
            self.send(event).await?;
        }
        Ok(count)
    }
}

pub struct ConfigSync {
    cache: QuotaCache,
    rx: mpsc::Receiver<Command>,
    parked: VecDeque<EventEnvelope>,
    max_pending: usize,
    stats: Arc<RwLock<SyncStats>>,
}

impl ConfigSync {
    pub fn new(cache: QuotaCache, config: &SyncConfig) -> (Self, SyncHandle) {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let stats = Arc::new(RwLock::new(SyncStats::new()));
        let actor = Self {
            cache,
            rx,
            parked: VecDeque::new(),
            max_pending: config.max_pending,
            stats: Arc::clone(&stats),
        };
        (actor, SyncHandle { tx, stats })
    }

    /// Process events until every handle has been dropped.
    pub async fn run(mut self) {
        tracing::info!(max_pending = self.max_pending, "Config sync started");
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Event(event) => self.handle(EventEnvelope::new(event)).await,
                Command::Flush(reply) => {
                    let _ = reply.send(self.stats.read().await.clone());
                }
            }
        }
        if !self.parked.is_empty() {
            tracing::warn!(parked = self.parked.len(), "Config sync stopped with parked events");
        }
        tracing::info!("Config sync stopped");
    }

    async fn handle(&mut self, envelope: EventEnvelope) {
        {
            let mut stats = self.stats.write().await;
            stats.received += 1;
            stats.last_event_at = Some(envelope.received_at);
        }
        tracing::debug!(
            event_id = %envelope.event_id,
            kind = envelope.event.kind(),
            node = %envelope.event.node_id(),
            "Config event received"
        );

        let changed = self.process(envelope).await;
        if changed {
            self.retry_parked().await;
        }
        self.reap().await;

        let mut stats = self.stats.write().await;
        stats.parked = self.parked.len();
        stats.pending_deletions = self.cache.pending_deletion().len();
    }

    /// Apply one event and record it. Returns whether the tree changed.
    async fn process(&mut self, envelope: EventEnvelope) -> bool {
        if let ConfigEvent::Delete { id } = &envelope.event {
            self.discard_parked(id);
        }

        match self.apply(&envelope.event) {
            Ok(outcome) => {
                self.discard_parked(envelope.event.node_id());
                let mut stats = self.stats.write().await;
                if outcome.changed() {
                    stats.applied += 1;
                } else {
                    stats.unchanged += 1;
                }
                tracing::debug!(
                    node = %envelope.event.node_id(),
                    outcome = ?outcome,
                    "Config event applied"
                );
                outcome.changed()
            }
            Err(err) if err.is_unknown_parent() => {
                self.park(envelope, &err).await;
                false
            }
            Err(err) => {
                self.stats.write().await.rejected += 1;
                tracing::warn!(
                    event_id = %envelope.event_id,
                    node = %envelope.event.node_id(),
                    error = %err,
                    "Config event rejected"
                );
                false
            }
        }
    }

    fn apply(&self, event: &ConfigEvent) -> Result<Outcome, QuotaError> {
        match event {
            ConfigEvent::UpsertCohort { id, parent } => self
                .cache
                .upsert_cohort(id, parent.as_ref())
                .map(Outcome::Upserted),
            ConfigEvent::UpsertQueue {
                id,
                parent,
                resource_groups,
                fair_share_weight,
            } => self
                .cache
                .upsert_queue(id, parent.as_ref(), resource_groups.clone(), *fair_share_weight)
                .map(Outcome::Upserted),
            ConfigEvent::Delete { id } => match self.cache.delete(id) {
                Ok(kind) => Ok(Outcome::Deleted(kind)),
                Err(QuotaError::Hierarchy(HierarchyError::HasChildren { children, .. })) => {
                    self.cache.mark_pending_deletion(id)?;
                    tracing::info!(cohort = %id, children, "Cohort deletion deferred");
                    Ok(Outcome::PendingDeletion)
                }
                Err(QuotaError::Hierarchy(HierarchyError::NotFound(_))) => Ok(Outcome::AlreadyAbsent),
                Err(err) => Err(err),
            },
        }
    }

    /// Drop a parked event superseded by a newer one for the same node.
    fn discard_parked(&mut self, id: &NodeId) {
        let before = self.parked.len();
        self.parked.retain(|p| p.event.node_id() != id);
        if self.parked.len() < before {
            tracing::debug!(node = %id, "Discarded superseded parked event");
        }
    }

    async fn park(&mut self, mut envelope: EventEnvelope, err: &QuotaError) {
        let id = envelope.event.node_id().clone();
        envelope.attempts += 1;

        if let Some(slot) = self.parked.iter_mut().find(|p| p.event.node_id() == &id) {
            tracing::debug!(node = %id, "Replaced parked event with a newer one");
            *slot = envelope;
            return;
        }
        if self.parked.len() >= self.max_pending {
            self.stats.write().await.dropped += 1;
            tracing::error!(
                node = %id,
                max_pending = self.max_pending,
                "Parked event limit reached, dropping event"
            );
            return;
        }
        tracing::debug!(node = %id, error = %err, "Parked event until its parent appears");
        self.parked.push_back(envelope);
    }

    /// Retry parked events until a full pass makes no progress.
    async fn retry_parked(&mut self) {
        loop {
            let mut progressed = false;
            let waiting = std::mem::take(&mut self.parked);
            for envelope in waiting {
                match self.apply(&envelope.event) {
                    Ok(outcome) => {
                        progressed = true;
                        let mut stats = self.stats.write().await;
                        if outcome.changed() {
                            stats.applied += 1;
                        } else {
                            stats.unchanged += 1;
                        }
                        tracing::debug!(
                            node = %envelope.event.node_id(),
                            attempts = envelope.attempts,
                            "Parked event applied"
                        );
                    }
                    Err(err) if err.is_unknown_parent() => {
                        let mut envelope = envelope;
                        envelope.attempts += 1;
                        self.parked.push_back(envelope);
                    }
                    Err(err) => {
                        self.stats.write().await.rejected += 1;
                        tracing::warn!(
                            node = %envelope.event.node_id(),
                            error = %err,
                            "Parked event rejected"
                        );
                    }
                }
            }
            if !progressed || self.parked.is_empty() {
                return;
            }
        }
    }

    async fn reap(&mut self) {
        match self.cache.reap_pending() {
            Ok(reaped) => {
                for id in reaped {
                    tracing::info!(cohort = %id, "Deferred cohort deletion completed");
                }
            }
            Err(err) => tracing::warn!(error = %err, "Reaping pending deletions failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_changed() {
        assert!(Outcome::Upserted(Change::Created).changed());
        assert!(Outcome::PendingDeletion.changed());
        assert!(!Outcome::Upserted(Change::Unchanged).changed());
        assert!(!Outcome::AlreadyAbsent.changed());
    }

    #[tokio::test]
    async fn test_flush_reports_stats() {
        let cache = QuotaCache::new();
        let (actor, handle) = ConfigSync::new(cache.clone(), &SyncConfig::default());
        let task = tokio::spawn(actor.run());

        handle
            .send(ConfigEvent::UpsertCohort {
                id: NodeId::from("c"),
                parent: None,
            })
            .await
            .unwrap();
        let stats = handle.flush().await.unwrap();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.applied, 1);
        assert!(stats.last_event_at.is_some());
        assert!(cache.contains(&NodeId::from("c")));

        drop(handle);
        task.await.unwrap();
    }
}
