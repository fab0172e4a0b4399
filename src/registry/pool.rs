// src/registry/pool.rs
use super::worker::Worker;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("worker {address}:{port} is already registered for host {host} ({count} workers)")]
    DuplicateWorker {
        host: String,
        address: String,
        port: u16,
        count: usize,
    },

    #[error("worker {address}:{port} belongs to host {worker_host}, not {host}")]
    HostMismatch {
        host: String,
        worker_host: String,
        address: String,
        port: u16,
    },
}

/// Workers of one host in registration order, plus the rotation cursor.
///
/// Invariant: `cursor < workers.len()` whenever `workers` is non-empty,
/// `cursor == 0` otherwise.
#[derive(Debug, Default)]
struct HostState {
    workers: Vec<Worker>,
    cursor: usize,
}

impl HostState {
    fn advance(&mut self) {
        if !self.workers.is_empty() {
            self.cursor = (self.cursor + 1) % self.workers.len();
        }
    }

    fn clamp_cursor(&mut self) {
        self.cursor = if self.workers.is_empty() {
            0
        } else {
            self.cursor % self.workers.len()
        };
    }
}

#[derive(Debug, Default)]
struct HostSlot {
    state: Mutex<HostState>,
}

impl HostSlot {
    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One host's entry as exposed by the admin listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostSnapshot {
    pub host: String,
    pub position: usize,
    pub workers: Vec<Worker>,
}

/// Host name → ordered workers and cursor.
///
/// Cloning yields another handle to the same registry. Every read and write
/// of a host's workers or cursor goes through that host's mutex; hosts never
/// contend with each other.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    hosts: Arc<DashMap<String, Arc<HostSlot>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, host: &str) -> Option<Arc<HostSlot>> {
        self.hosts.get(host).map(|entry| entry.value().clone())
    }

    // Single creation point for a host's lock: the map shard is held while
    // the slot is inserted, so racing registrations end up on the same mutex.
    fn slot_or_create(&self, host: &str) -> Arc<HostSlot> {
        if let Some(slot) = self.slot(host) {
            return slot;
        }
        self.hosts.entry(host.to_string()).or_default().value().clone()
    }

    /// Workers for `host` in rotation order; empty for an unknown host.
    pub fn get(&self, host: &str) -> Vec<Worker> {
        self.slot(host)
            .map(|slot| slot.lock().workers.clone())
            .unwrap_or_default()
    }

    pub fn len(&self, host: &str) -> usize {
        self.slot(host).map(|slot| slot.lock().workers.len()).unwrap_or(0)
    }

    /// Append `worker` to `host`'s rotation and return the new count, unless
    /// a worker with the same address and port is already there.
    ///
    /// `host` must equal `worker.host`, since removal is keyed by the latter.
    pub fn set(&self, host: &str, worker: Worker) -> Result<usize, RegistryError> {
        if worker.host != host {
            return Err(RegistryError::HostMismatch {
                host: host.to_string(),
                worker_host: worker.host,
                address: worker.address,
                port: worker.port,
            });
        }

        let slot = self.slot_or_create(host);
        let mut state = slot.lock();

        if state.workers.iter().any(|w| w.same_endpoint(&worker)) {
            return Err(RegistryError::DuplicateWorker {
                host: host.to_string(),
                address: worker.address,
                port: worker.port,
                count: state.workers.len(),
            });
        }

        state.workers.push(worker);
        tracing::debug!(host, count = state.workers.len(), "worker appended");
        Ok(state.workers.len())
    }

    /// Drop every worker of `worker.host` sharing `worker`'s address and
    /// port, then pull the cursor back into range. Returns the remaining
    /// count; unknown hosts and workers are a no-op.
    pub fn remove(&self, worker: &Worker) -> usize {
        let Some(slot) = self.slot(&worker.host) else {
            return 0;
        };
        let mut state = slot.lock();

        let before = state.workers.len();
        state.workers.retain(|w| !w.same_endpoint(worker));
        state.clamp_cursor();

        tracing::debug!(
            host = %worker.host,
            removed = before - state.workers.len(),
            cursor = state.cursor,
            "workers removed"
        );
        state.workers.len()
    }

    pub fn position(&self, host: &str) -> usize {
        self.slot(host).map(|slot| slot.lock().cursor).unwrap_or(0)
    }

    /// Move the cursor to the next worker; no-op for an empty host.
    pub fn advance(&self, host: &str) {
        if let Some(slot) = self.slot(host) {
            slot.lock().advance();
        }
    }

    /// Run `observe` with `host`'s worker count while holding the host lock,
    /// so observers see counts in the order mutations happened.
    pub fn with_len<F>(&self, host: &str, observe: F)
    where
        F: FnOnce(usize),
    {
        match self.slot(host) {
            Some(slot) => {
                let state = slot.lock();
                observe(state.workers.len());
            }
            None => observe(0),
        }
    }

    /// Worker under the cursor, leaving the cursor where it is.
    pub fn current(&self, host: &str) -> Option<Worker> {
        let slot = self.slot(host)?;
        let state = slot.lock();
        state.workers.get(state.cursor).cloned()
    }

    /// Worker under the cursor, advancing the cursor in the same critical
    /// section.
    pub fn select_and_advance(&self, host: &str) -> Option<Worker> {
        let slot = self.slot(host)?;
        let mut state = slot.lock();
        let worker = state.workers.get(state.cursor).cloned()?;
        state.advance();
        Some(worker)
    }

    /// Every known host, sorted by name, including hosts whose workers have
    /// all been removed.
    pub fn snapshot(&self) -> Vec<HostSnapshot> {
        let slots: Vec<(String, Arc<HostSlot>)> = self
            .hosts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut hosts: Vec<HostSnapshot> = slots
            .into_iter()
            .map(|(host, slot)| {
                let state = slot.lock();
                HostSnapshot {
                    host,
                    position: state.cursor,
                    workers: state.workers.clone(),
                }
            })
            .collect();
        hosts.sort_by(|a, b| a.host.cmp(&b.host));
        hosts
    }
}
