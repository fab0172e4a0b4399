// src/proxy/error.rs
use hyper::{Body, Response, StatusCode};
use std::time::Duration;

use crate::admin::text_response;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("request carries no usable host")]
    MissingHost,

    #[error("no worker registered for host {0}")]
    NoBackend(String),

    #[error("cannot build upstream request: {0}")]
    InvalidUpstream(#[from] hyper::http::Error),

    #[error("worker {worker} unreachable: {source}")]
    UpstreamUnreachable {
        worker: String,
        #[source]
        source: hyper::Error,
    },

    #[error("failed reading response from worker {worker}: {source}")]
    UpstreamRead {
        worker: String,
        #[source]
        source: hyper::Error,
    },

    #[error("worker {worker} did not answer within {timeout:?}")]
    UpstreamTimeout { worker: String, timeout: Duration },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingHost => StatusCode::BAD_REQUEST,
            ProxyError::NoBackend(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label for the upstream outcome metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            ProxyError::MissingHost | ProxyError::NoBackend(_) => "unrouted",
            ProxyError::InvalidUpstream(_) => "invalid",
            ProxyError::UpstreamUnreachable { .. } => "unreachable",
            ProxyError::UpstreamRead { .. } => "read_error",
            ProxyError::UpstreamTimeout { .. } => "timeout",
        }
    }
}

impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let message = match err {
            ProxyError::MissingHost => "Missing host.\n",
            ProxyError::NoBackend(_) => "Not found.\n",
            _ => "Internal Server Error.\n",
        };
        text_response(err.status(), message)
    }
}
