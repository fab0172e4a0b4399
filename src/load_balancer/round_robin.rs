// src/load_balancer/round_robin.rs
use crate::load_balancer::LoadBalancer;
use crate::registry::{Worker, WorkerRegistry};
use tokio::task::JoinHandle;

/// Round robin where the cursor is advanced off the request path.
///
/// Two requests for the same host that arrive before either advance lands
/// are sent to the same worker. Over time the distribution still evens out.
#[derive(Debug, Default)]
pub struct DeferredRoundRobin;

impl DeferredRoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for DeferredRoundRobin {
    fn select(&self, registry: &WorkerRegistry, host: &str) -> Option<Worker> {
        registry.current(host)
    }

    fn complete(&self, registry: &WorkerRegistry, host: &str) -> Option<JoinHandle<()>> {
        let registry = registry.clone();
        let host = host.to_string();
        Some(tokio::spawn(async move {
            registry.advance(&host);
        }))
    }

    fn name(&self) -> &'static str {
        "deferred_round_robin"
    }
}

/// Strict round robin: selection and advance happen under the host lock.
#[derive(Debug, Default)]
pub struct AtomicRoundRobin;

impl AtomicRoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for AtomicRoundRobin {
    fn select(&self, registry: &WorkerRegistry, host: &str) -> Option<Worker> {
        registry.select_and_advance(host)
    }

    fn complete(&self, _registry: &WorkerRegistry, _host: &str) -> Option<JoinHandle<()>> {
        None
    }

    fn name(&self) -> &'static str {
        "atomic_round_robin"
    }
}
