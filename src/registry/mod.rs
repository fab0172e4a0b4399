// src/registry/mod.rs
mod host;
mod pool;
mod worker;

pub use host::normalize_host;
pub use pool::{HostSnapshot, RegistryError, WorkerRegistry};
pub use worker::Worker;
