// src/proxy/upstream.rs
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName};
use hyper::{Body, Client, Request, Response, Uri};
use std::time::Duration;

use super::ProxyError;
use crate::config::UpstreamConfig;
use crate::registry::Worker;

/// Outbound HTTP/1 client used to reach workers.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<HttpConnector>,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.connect_timeout()));
        connector.set_nodelay(true);

        Self {
            client: Client::builder().build(connector),
            timeout: config.timeout(),
        }
    }

    /// Send `req` to `worker` and buffer the whole answer.
    ///
    /// Connect, response head and body read share one deadline. Dropping the
    /// returned future aborts the outbound exchange.
    pub async fn forward(
        &self,
        worker: &Worker,
        req: Request<Body>,
    ) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = req.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let mut outbound = Request::builder()
            .method(parts.method)
            .uri(upstream_uri(worker, path)?)
            .body(body)?;
        copy_end_to_end(&parts.headers, outbound.headers_mut(), &[hyper::header::HOST]);

        let endpoint = worker.to_string();
        let exchange = async {
            let response = self.client.request(outbound).await.map_err(|source| {
                ProxyError::UpstreamUnreachable {
                    worker: endpoint.clone(),
                    source,
                }
            })?;

            let (head, body) = response.into_parts();
            let bytes = hyper::body::to_bytes(body)
                .await
                .map_err(|source| ProxyError::UpstreamRead {
                    worker: endpoint.clone(),
                    source,
                })?;

            let mut relayed = Response::new(Body::from(bytes));
            *relayed.status_mut() = head.status;
            copy_end_to_end(
                &head.headers,
                relayed.headers_mut(),
                &[hyper::header::CONTENT_LENGTH],
            );
            Ok(relayed)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::UpstreamTimeout {
                worker: worker.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

pub(crate) fn upstream_uri(worker: &Worker, path_and_query: &str) -> Result<Uri, hyper::http::Error> {
    Uri::builder()
        .scheme("http")
        .authority(worker.authority())
        .path_and_query(path_and_query)
        .build()
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn copy_end_to_end(from: &HeaderMap, to: &mut HeaderMap, skip: &[HeaderName]) {
    for (name, value) in from {
        if is_hop_by_hop(name) || skip.contains(name) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE, HOST};

    #[test]
    fn builds_worker_uri() {
        let worker = Worker::new("a.com", "10.0.0.1", 9000);
        let uri = upstream_uri(&worker, "/items?page=2").unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.1:9000/items?page=2");

        let worker = Worker::new("a.com", "::1", 9000);
        let uri = upstream_uri(&worker, "/").unwrap();
        assert_eq!(uri.to_string(), "http://[::1]:9000/");
    }

    #[test]
    fn invalid_address_is_an_error() {
        let worker = Worker::new("a.com", "bad address", 9000);
        assert!(upstream_uri(&worker, "/").is_err());
    }

    #[test]
    fn drops_hop_by_hop_and_skipped_headers() {
        let mut from = HeaderMap::new();
        from.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        from.insert(HOST, HeaderValue::from_static("a.com"));
        from.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        from.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        from.append("x-trace", HeaderValue::from_static("1"));
        from.append("x-trace", HeaderValue::from_static("2"));

        let mut to = HeaderMap::new();
        copy_end_to_end(&from, &mut to, &[HOST]);

        assert_eq!(to.len(), 3);
        assert_eq!(to[CONTENT_TYPE], "text/plain");
        assert_eq!(to.get_all("x-trace").iter().count(), 2);
        assert!(!to.contains_key(HOST));
        assert!(!to.contains_key(CONNECTION));
    }
}
