// src/admin/handler.rs
use hyper::body::HttpBody;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::http::uri::Authority;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::net::Ipv6Addr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::metrics::MetricsCollector;
use crate::registry::{normalize_host, RegistryError, Worker, WorkerRegistry};

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("failed reading request body: {0}")]
    Body(#[from] hyper::Error),

    #[error("invalid worker description: {0}")]
    InvalidBody(#[source] serde_json::Error),

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("worker description has an invalid {0}")]
    InvalidField(&'static str),

    #[error("method {0} is not supported on the admin endpoint")]
    MethodNotAllowed(Method),

    #[error("unknown admin resource {0}")]
    UnknownResource(String),

    #[error("failed encoding worker listing: {0}")]
    Encode(#[source] serde_json::Error),
}

impl AdminError {
    pub fn status(&self) -> StatusCode {
        match self {
            AdminError::Body(_) | AdminError::InvalidBody(_) | AdminError::InvalidField(_) => {
                StatusCode::BAD_REQUEST
            }
            AdminError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AdminError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AdminError::UnknownResource(_) => StatusCode::NOT_FOUND,
            AdminError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AdminError> for Response<Body> {
    fn from(err: AdminError) -> Self {
        let message = match err {
            AdminError::Body(_) | AdminError::InvalidBody(_) | AdminError::InvalidField(_) => {
                "Invalid post data"
            }
            AdminError::BodyTooLarge(_) => "Request body too large.\n",
            AdminError::MethodNotAllowed(_) => "Method not allowed.\n",
            AdminError::UnknownResource(_) => "Not found.\n",
            AdminError::Encode(_) => "Internal Server Error.\n",
        };
        text_response(err.status(), message)
    }
}

const DEFAULT_BODY_LIMIT: usize = 16 * 1024;

/// Registration and removal of workers.
#[derive(Clone)]
pub struct AdminHandler {
    registry: WorkerRegistry,
    prefix: String,
    body_limit: usize,
    metrics: Arc<MetricsCollector>,
}

impl AdminHandler {
    pub fn new(registry: WorkerRegistry, prefix: String, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            registry,
            prefix,
            body_limit: DEFAULT_BODY_LIMIT,
            metrics,
        }
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Whether `path` falls under the admin prefix.
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Serve a request addressed to the admin prefix.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let resource = req
            .uri()
            .path()
            .strip_prefix(self.prefix.as_str())
            .unwrap_or_default()
            .to_string();

        let result = match resource.as_str() {
            "" | "/" | "/workers" | "/workers/" => {
                if req.method() == Method::GET {
                    self.list()
                } else {
                    self.mutate(req).await
                }
            }
            _ => Err(AdminError::UnknownResource(resource)),
        };

        self.respond(result)
    }

    /// Serve a registration or removal that reached the balancer through a
    /// host with no workers.
    pub async fn handle_mutation(&self, req: Request<Body>) -> Response<Body> {
        let result = self.mutate(req).await;
        self.respond(result)
    }

    fn respond(&self, result: Result<Response<Body>, AdminError>) -> Response<Body> {
        result.unwrap_or_else(|err| {
            warn!(%err, "admin request rejected");
            err.into()
        })
    }

    async fn mutate(&self, req: Request<Body>) -> Result<Response<Body>, AdminError> {
        let method = req.method().clone();
        match method {
            Method::POST | Method::PUT => {
                let worker = decode_worker(req.into_body(), self.body_limit).await;
                self.register(worker.map_err(|err| self.rejected("register", err))?)
            }
            Method::DELETE => {
                let worker = decode_worker(req.into_body(), self.body_limit).await;
                self.deregister(worker.map_err(|err| self.rejected("remove", err))?)
            }
            other => Err(AdminError::MethodNotAllowed(other)),
        }
    }

    fn rejected(&self, operation: &str, err: AdminError) -> AdminError {
        self.metrics.record_admin_operation(operation, "invalid");
        err
    }

    fn register(&self, worker: Worker) -> Result<Response<Body>, AdminError> {
        let host = worker.host.clone();
        let address = worker.address.clone();
        let port = worker.port;

        let message = match self.registry.set(&host, worker) {
            Ok(count) => {
                info!(%host, %address, port, count, "worker registered");
                self.metrics.record_admin_operation("register", "added");
                self.record_worker_count(&host);
                format!(
                    "added worker {} to workers for host {}. There are now {} workers for {}\n",
                    address, host, count, host
                )
            }
            Err(RegistryError::DuplicateWorker { count, .. }) => {
                info!(%host, %address, port, count, "duplicate worker ignored");
                self.metrics.record_admin_operation("register", "duplicate");
                format!(
                    "detected duplicate worker {} for host {}. There are still {} workers for {}\n",
                    address, host, count, host
                )
            }
            Err(err @ RegistryError::HostMismatch { .. }) => {
                warn!(%err, "registration rejected");
                return Err(self.rejected("register", AdminError::InvalidField("Host")));
            }
        };

        Ok(text_response(StatusCode::OK, message))
    }

    fn deregister(&self, worker: Worker) -> Result<Response<Body>, AdminError> {
        let count = self.registry.remove(&worker);

        info!(host = %worker.host, address = %worker.address, port = worker.port, count, "worker removed");
        self.metrics.record_admin_operation("remove", "removed");
        self.record_worker_count(&worker.host);

        Ok(text_response(
            StatusCode::OK,
            format!(
                "removed worker {} from workers for host {}. There are now {} workers for {}\n",
                worker.address, worker.host, count, worker.host
            ),
        ))
    }

    // Read under the host lock so concurrent mutations cannot leave the
    // gauge on an older count.
    fn record_worker_count(&self, host: &str) {
        self.registry
            .with_len(host, |count| self.metrics.set_registered_workers(host, count));
    }

    fn list(&self) -> Result<Response<Body>, AdminError> {
        let body = serde_json::to_vec(&self.registry.snapshot()).map_err(AdminError::Encode)?;

        let mut response = Response::new(Body::from(body));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(response)
    }
}

async fn read_body(mut body: Body, limit: usize) -> Result<Vec<u8>, AdminError> {
    if body.size_hint().lower() > limit as u64 {
        return Err(AdminError::BodyTooLarge(limit));
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        if bytes.len() + chunk.len() > limit {
            return Err(AdminError::BodyTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn decode_worker(body: Body, limit: usize) -> Result<Worker, AdminError> {
    let bytes = read_body(body, limit).await?;
    let mut worker: Worker = serde_json::from_slice(&bytes).map_err(AdminError::InvalidBody)?;

    worker.host = normalize_host(&worker.host).ok_or(AdminError::InvalidField("Host"))?;
    worker.address = worker.address.trim().to_string();
    if worker.address.is_empty() {
        return Err(AdminError::InvalidField("Address"));
    }
    if worker.port == 0 {
        return Err(AdminError::InvalidField("Port"));
    }
    if !is_dialable(&worker) {
        return Err(AdminError::InvalidField("Address"));
    }

    Ok(worker)
}

/// Whether `worker.authority()` is a plain `host:port` the upstream client
/// can build a URI from. Addresses with a colon must be IPv6 literals.
fn is_dialable(worker: &Worker) -> bool {
    let Ok(authority) = worker.authority().parse::<Authority>() else {
        return false;
    };
    if authority.port_u16() != Some(worker.port) {
        return false;
    }

    let host = authority.host();
    match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        Some(literal) => literal.parse::<Ipv6Addr>().is_ok(),
        None => host == worker.address,
    }
}

pub(crate) fn text_response(status: StatusCode, message: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(message.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
