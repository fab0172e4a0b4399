// ────────────────────────────────
// src/proxy/dispatcher.rs
// Routes every inbound request to the admin surface or to a worker.
// ────────────────────────────────

use hyper::header::HOST;
use hyper::{Body, Method, Request, Response};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use super::{ProxyError, UpstreamClient};
use crate::admin::AdminHandler;
use crate::config::Config;
use crate::load_balancer::{create_load_balancer, LoadBalancer};
use crate::metrics::MetricsCollector;
use crate::registry::{normalize_host, WorkerRegistry};

pub struct Dispatcher {
    registry: WorkerRegistry,
    balancer: Arc<dyn LoadBalancer>,
    upstream: UpstreamClient,
    admin: AdminHandler,
    legacy_admin: bool,
    metrics: Arc<MetricsCollector>,
}

impl Dispatcher {
    pub fn new(config: &Config, registry: WorkerRegistry, metrics: Arc<MetricsCollector>) -> Self {
        let admin = AdminHandler::new(
            registry.clone(),
            config.server.admin_prefix.clone(),
            metrics.clone(),
        )
        .with_body_limit(config.server.max_admin_body_bytes);

        Self {
            balancer: create_load_balancer(config.rotation),
            upstream: UpstreamClient::new(&config.upstream),
            legacy_admin: config.server.legacy_admin,
            registry,
            admin,
            metrics,
        }
    }

    pub fn balancer_name(&self) -> &'static str {
        self.balancer.name()
    }

    /// Serve one inbound request. Failures are turned into responses here.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let span = info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %method,
            path = %req.uri().path(),
        );

        async move {
            let start = Instant::now();
            let response = match self.route(req).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(%err, "request failed");
                    err.into()
                }
            };

            self.metrics
                .record_request(method.as_str(), response.status().as_u16(), start.elapsed());
            response
        }
        .instrument(span)
        .await
    }

    async fn route(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        if self.admin.matches(req.uri().path()) {
            return Ok(self.admin.handle(req).await);
        }

        let host = resolve_host(&req).ok_or(ProxyError::MissingHost)?;

        if self.registry.len(&host) == 0 {
            if self.legacy_admin && is_admin_method(req.method()) {
                debug!(%host, "host has no workers, handling request as admin call");
                return Ok(self.admin.handle_mutation(req).await);
            }
            return Err(ProxyError::NoBackend(host));
        }

        // The last worker may have been removed since the emptiness check.
        let worker = self
            .balancer
            .select(&self.registry, &host)
            .ok_or_else(|| ProxyError::NoBackend(host.clone()))?;
        debug!(%host, %worker, "worker selected");

        let start = Instant::now();
        let result = self.upstream.forward(&worker, req).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.outcome(),
        };
        self.metrics.record_upstream(&host, outcome, start.elapsed());

        let response = result?;
        self.balancer.complete(&self.registry, &host);
        Ok(response)
    }
}

/// Registry key for `req`: the absolute-form URI authority if present,
/// the `Host` header otherwise.
pub fn resolve_host(req: &Request<Body>) -> Option<String> {
    if let Some(authority) = req.uri().authority() {
        return normalize_host(authority.as_str());
    }

    req.headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .and_then(normalize_host)
}

fn is_admin_method(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::DELETE)
}
