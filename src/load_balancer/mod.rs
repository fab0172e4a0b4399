// src/load_balancer/mod.rs
mod algorithm;
mod round_robin;

pub use algorithm::LoadBalancer; // trait
pub use round_robin::{AtomicRoundRobin, DeferredRoundRobin};
pub use crate::config::RotationMode;

use std::sync::Arc;

pub fn create_load_balancer(mode: RotationMode) -> Arc<dyn LoadBalancer> {
    match mode {
        RotationMode::Deferred => Arc::new(DeferredRoundRobin::new()),
        RotationMode::Atomic => Arc::new(AtomicRoundRobin::new()),
    }
}
