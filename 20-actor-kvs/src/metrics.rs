//! Aggregate counters for the store.
//!
//! The counters belong to a single aggregator task. Everything else talks to
//! it through a [`MetricsHandle`]: outcomes are pushed over an unbounded
//! channel so recording never waits, and reads go through
//! [`MetricsHandle::snapshot`].

use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Get,
    Set,
    Update,
    Delete,
}

/// How an operation changed the number of stored entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeChange {
    Grew,
    Shrank,
    Unchanged,
}

/// The record of one finished operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub kind: OperationKind,
    pub success: bool,
    pub size_change: SizeChange,
}

impl Outcome {
    pub fn succeeded(kind: OperationKind, size_change: SizeChange) -> Self {
        Self {
            kind,
            success: true,
            size_change,
        }
    }

    pub fn failed(kind: OperationKind) -> Self {
        Self {
            kind,
            success: false,
            size_change: SizeChange::Unchanged,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub size: u64,
    pub operations: u64,
    pub successful_operations: u64,
}

enum MetricsMessage {
    Seeded {
        entries: u64,
    },
    Record(Outcome),
    Snapshot {
        respond_to: oneshot::Sender<MetricsSnapshot>,
    },
    Stop,
}

/// Cloneable sender side of the aggregator.
#[derive(Clone)]
pub struct MetricsHandle {
    tx: mpsc::UnboundedSender<MetricsMessage>,
}

impl MetricsHandle {
    /// Queues an outcome. Never blocks; outcomes sent after the aggregator
    /// stopped are dropped.
    pub fn record(&self, outcome: Outcome) {
        if self.tx.send(MetricsMessage::Record(outcome)).is_err() {
            debug!(?outcome, "metrics aggregator stopped, dropping outcome");
        }
    }

    /// Counts entries that were loaded at startup rather than stored through
    /// an operation.
    pub fn record_seed(&self, entries: u64) {
        if self.tx.send(MetricsMessage::Seeded { entries }).is_err() {
            debug!(entries, "metrics aggregator stopped, dropping seed count");
        }
    }

    /// Current counter values, or `None` once the aggregator has stopped.
    ///
    /// Outcomes recorded by this caller before the call are always included.
    pub async fn snapshot(&self) -> Option<MetricsSnapshot> {
        let (respond_to, rx) = oneshot::channel();
        self.tx.send(MetricsMessage::Snapshot { respond_to }).ok()?;
        rx.await.ok()
    }
}

/// Owner of the aggregator task.
pub struct Metrics {
    handle: MetricsHandle,
    task: JoinHandle<MetricsSnapshot>,
}

impl Metrics {
    pub fn start() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(aggregate(rx));
        Self {
            handle: MetricsHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> MetricsHandle {
        self.handle.clone()
    }

    /// Stops the aggregator after everything already queued has been counted
    /// and returns the final values.
    pub async fn stop(self) -> MetricsSnapshot {
        let _ = self.handle.tx.send(MetricsMessage::Stop);
        self.task.await.unwrap_or_default()
    }
}

async fn aggregate(mut rx: mpsc::UnboundedReceiver<MetricsMessage>) -> MetricsSnapshot {
    let mut counters = MetricsSnapshot::default();

    while let Some(message) = rx.recv().await {
        match message {
            MetricsMessage::Seeded { entries } => counters.size += entries,
            MetricsMessage::Record(outcome) => apply(&mut counters, outcome),
            MetricsMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(counters);
            }
            MetricsMessage::Stop => break,
        }
    }

    counters
}

fn apply(counters: &mut MetricsSnapshot, outcome: Outcome) {
    counters.operations += 1;
    if !outcome.success {
        return;
    }
    counters.successful_operations += 1;
    match outcome.size_change {
        SizeChange::Grew => counters.size += 1,
        SizeChange::Shrank => counters.size = counters.size.saturating_sub(1),
        SizeChange::Unchanged => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_operations_and_size() {
        let metrics = Metrics::start();
        let handle = metrics.handle();

        handle.record(Outcome::succeeded(OperationKind::Set, SizeChange::Grew));
        handle.record(Outcome::succeeded(OperationKind::Set, SizeChange::Grew));
        handle.record(Outcome::succeeded(OperationKind::Get, SizeChange::Unchanged));
        handle.record(Outcome::failed(OperationKind::Update));
        handle.record(Outcome::succeeded(OperationKind::Delete, SizeChange::Shrank));

        let snapshot = handle.snapshot().await.expect("aggregator running");
        assert_eq!(
            snapshot,
            MetricsSnapshot {
                size: 1,
                operations: 5,
                successful_operations: 4,
            }
        );
    }

    #[tokio::test]
    async fn seeded_entries_count_toward_size_only() {
        let metrics = Metrics::start();
        let handle = metrics.handle();
        handle.record_seed(3);

        let snapshot = handle.snapshot().await.expect("aggregator running");
        assert_eq!(snapshot.size, 3);
        assert_eq!(snapshot.operations, 0);
    }

    #[tokio::test]
    async fn stop_returns_final_counters_and_detaches_handles() {
        let metrics = Metrics::start();
        let handle = metrics.handle();
        handle.record(Outcome::failed(OperationKind::Get));

        let last = metrics.stop().await;
        assert_eq!(last.operations, 1);
        assert_eq!(last.successful_operations, 0);

        handle.record(Outcome::failed(OperationKind::Get));
        handle.record_seed(2);
        assert!(handle.snapshot().await.is_none());
    }
}
