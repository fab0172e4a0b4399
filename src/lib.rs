// src/lib.rs
pub mod admin;
pub mod config;
pub mod load_balancer;
pub mod metrics;
pub mod proxy;
pub mod registry;
pub mod server;
