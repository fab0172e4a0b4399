// src/load_balancer/algorithm.rs
use crate::registry::{Worker, WorkerRegistry};
use tokio::task::JoinHandle;

pub trait LoadBalancer: Send + Sync {
    /// Pick the worker that serves the current request for `host`.
    fn select(&self, registry: &WorkerRegistry, host: &str) -> Option<Worker>;

    /// Called after the selected worker answered. Returns the handle of any
    /// background work the strategy scheduled.
    fn complete(&self, registry: &WorkerRegistry, host: &str) -> Option<JoinHandle<()>>;

    fn name(&self) -> &'static str;
}
