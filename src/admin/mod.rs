// src/admin/mod.rs
mod handler;

pub use handler::{AdminError, AdminHandler};
pub(crate) use handler::text_response;
