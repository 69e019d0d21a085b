//! The store engine: one worker task that owns the map.
//!
//! Callers never touch the map. Each [`StoreHandle`] method validates its
//! input, builds an [`Operation`] carrying a oneshot reply channel, pushes it
//! into the single bounded intake channel and awaits the reply. The worker
//! pulls operations off the intake one at a time, so every operation is
//! atomic with respect to every other and they are applied in the order the
//! intake accepted them.
//!
//! ```text
//!  caller ──Operation──▶ intake (mpsc, FIFO) ──▶ worker ──▶ HashMap
//!    ▲                                             │
//!    └──────────── oneshot reply ◀─────────────────┤
//!                                                  └──▶ metrics (fire and forget)
//! ```
//!
//! Replies are oneshot sends, which never wait. A caller that gives up on its
//! reply therefore cannot stall the worker; the reply is simply dropped.

use std::collections::HashMap;

use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::StoreError,
    id::Identifier,
    metrics::{MetricsHandle, OperationKind, Outcome, SizeChange},
};

/// Initial contents handed to [`Engine::start`].
pub type Seed = HashMap<Identifier, Value>;

pub const DEFAULT_INTAKE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Operations the intake buffers before submitting callers have to wait.
    pub intake_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
        }
    }
}

/// Requests sent from callers to the worker. All ids are already parsed.
enum Operation {
    Get {
        id: Identifier,
        respond_to: oneshot::Sender<Option<Value>>,
    },
    Set {
        value: Value,
        respond_to: oneshot::Sender<Identifier>,
    },
    Update {
        id: Identifier,
        value: Value,
        respond_to: oneshot::Sender<()>,
    },
    Delete {
        id: Identifier,
        respond_to: oneshot::Sender<()>,
    },
    /// Sent only by [`Engine::stop`].
    Stop,
}

/// Cheaply cloneable access to a running engine.
#[derive(Clone)]
pub struct StoreHandle {
    intake: mpsc::Sender<Operation>,
    metrics: MetricsHandle,
}

impl StoreHandle {
    /// Looks up `id`. A well-formed id that is not stored yields `Ok(None)`.
    pub async fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let id = self.checked_id(OperationKind::Get, id)?;
        let (respond_to, reply) = oneshot::channel();
        self.submit(Operation::Get { id, respond_to }, reply).await
    }

    /// Stores `value` under a freshly generated identifier and returns it.
    ///
    /// `null` is refused with [`StoreError::MissingValue`] before any
    /// identifier is allocated.
    pub async fn set(&self, value: Value) -> Result<Identifier, StoreError> {
        self.checked_value(OperationKind::Set, &value)?;
        let (respond_to, reply) = oneshot::channel();
        self.submit(Operation::Set { value, respond_to }, reply).await
    }

    /// Replaces the value under `id`, inserting it if `id` is not stored yet.
    pub async fn update(&self, id: &str, value: Value) -> Result<(), StoreError> {
        let id = self.checked_id(OperationKind::Update, id)?;
        self.checked_value(OperationKind::Update, &value)?;
        let (respond_to, reply) = oneshot::channel();
        self.submit(
            Operation::Update {
                id,
                value,
                respond_to,
            },
            reply,
        )
        .await
    }

    /// Removes `id`. Removing an id that is not stored succeeds.
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = self.checked_id(OperationKind::Delete, id)?;
        let (respond_to, reply) = oneshot::channel();
        self.submit(Operation::Delete { id, respond_to }, reply).await
    }

    pub fn metrics(&self) -> &MetricsHandle {
        &self.metrics
    }

    async fn submit<T>(
        &self,
        operation: Operation,
        reply: oneshot::Receiver<T>,
    ) -> Result<T, StoreError> {
        self.intake
            .send(operation)
            .await
            .map_err(|_| StoreError::Unavailable)?;
        reply.await.map_err(|_| StoreError::Unavailable)
    }

    fn checked_id(&self, kind: OperationKind, text: &str) -> Result<Identifier, StoreError> {
        let checked = if text.is_empty() {
            Err(StoreError::MissingIdentifier)
        } else {
            Identifier::parse(text).map_err(StoreError::from)
        };
        if checked.is_err() {
            self.metrics.record(Outcome::failed(kind));
        }
        checked
    }

    fn checked_value(&self, kind: OperationKind, value: &Value) -> Result<(), StoreError> {
        if value.is_null() {
            self.metrics.record(Outcome::failed(kind));
            return Err(StoreError::MissingValue);
        }
        Ok(())
    }
}

/// A running engine. Dropping it without calling [`Engine::stop`] leaves the
/// worker running until every [`StoreHandle`] is gone.
pub struct Engine {
    handle: StoreHandle,
    worker: JoinHandle<usize>,
}

impl Engine {
    /// Spawns the worker onto the current tokio runtime.
    ///
    /// `null` values in `seed` are skipped since the store never holds them.
    pub fn start(config: EngineConfig, seed: Seed, metrics: MetricsHandle) -> Self {
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity.max(1));

        let mut entries = seed;
        entries.retain(|id, value| {
            if value.is_null() {
                warn!(%id, "skipping null seed value");
            }
            !value.is_null()
        });
        metrics.record_seed(entries.len() as u64);
        info!(
            entries = entries.len(),
            intake_capacity = config.intake_capacity,
            "store engine started"
        );

        let worker = Worker {
            entries,
            intake: intake_rx,
            metrics: metrics.clone(),
        };

        Self {
            handle: StoreHandle {
                intake: intake_tx,
                metrics,
            },
            worker: tokio::spawn(worker.run()),
        }
    }

    pub fn handle(&self) -> StoreHandle {
        self.handle.clone()
    }

    /// Asks the worker to finish every operation already accepted, then exit.
    ///
    /// Operations submitted after this point fail with
    /// [`StoreError::Unavailable`]. Returns the number of entries held when the
    /// worker exited.
    pub async fn stop(self) -> usize {
        let Engine { handle, worker } = self;
        if handle.intake.send(Operation::Stop).await.is_err() {
            debug!("store worker already gone");
        }
        drop(handle);

        match worker.await {
            Ok(remaining) => {
                info!(entries = remaining, "store engine stopped");
                remaining
            }
            Err(err) => {
                warn!(error = ?err, "store worker ended abnormally");
                0
            }
        }
    }
}

struct Worker {
    entries: HashMap<Identifier, Value>,
    intake: mpsc::Receiver<Operation>,
    metrics: MetricsHandle,
}

impl Worker {
    async fn run(mut self) -> usize {
        while let Some(operation) = self.intake.recv().await {
            self.execute(operation);
        }
        self.entries.len()
    }

    fn execute(&mut self, operation: Operation) {
        match operation {
            Operation::Get { id, respond_to } => {
                let value = self.entries.get(&id).cloned();
                self.finish(OperationKind::Get, SizeChange::Unchanged);
                let _ = respond_to.send(value);
            }
            Operation::Set { value, respond_to } => {
                let id = Identifier::generate();
                self.entries.insert(id, value);
                debug!(%id, "stored new entry");
                self.finish(OperationKind::Set, SizeChange::Grew);
                let _ = respond_to.send(id);
            }
            Operation::Update {
                id,
                value,
                respond_to,
            } => {
                let change = match self.entries.insert(id, value) {
                    Some(_) => SizeChange::Unchanged,
                    None => {
                        debug!(%id, "update inserted a new entry");
                        SizeChange::Grew
                    }
                };
                self.finish(OperationKind::Update, change);
                let _ = respond_to.send(());
            }
            Operation::Delete { id, respond_to } => {
                let change = match self.entries.remove(&id) {
                    Some(_) => SizeChange::Shrank,
                    None => SizeChange::Unchanged,
                };
                self.finish(OperationKind::Delete, change);
                let _ = respond_to.send(());
            }
            // Closing keeps what is already buffered; recv drains it and then
            // returns None.
            Operation::Stop => self.intake.close(),
        }
    }

    fn finish(&self, kind: OperationKind, change: SizeChange) {
        self.metrics.record(Outcome::succeeded(kind, change));
    }
}
