//
// src/proxy/mod.rs
//
mod dispatcher;
mod error;
mod upstream;

pub use dispatcher::{resolve_host, Dispatcher};
pub use error::ProxyError;
pub use upstream::UpstreamClient;
