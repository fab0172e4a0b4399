// tests/load_balancer_tests.rs
use host_balancer::config::{Config, RotationMode};
use host_balancer::metrics::MetricsRegistry;
use host_balancer::proxy::Dispatcher;
use host_balancer::registry::WorkerRegistry;
use host_balancer::server::{RequestHandler, ServerBuilder};
use hyper::header::HOST;
use hyper::{Body, Method, Request, StatusCode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn config(rotation: RotationMode) -> Config {
    let mut config = Config::default();
    config.rotation = rotation;
    config.upstream.timeout_ms = 2_000;
    config.upstream.connect_timeout_ms = 500;
    config
}

fn balancer(config: &Config) -> (RequestHandler, WorkerRegistry) {
    let registry = WorkerRegistry::new();
    let metrics = MetricsRegistry::new().unwrap().collector();
    let dispatcher = Dispatcher::new(config, registry.clone(), metrics);
    (RequestHandler::new(Arc::new(dispatcher)), registry)
}

fn request(method: Method, host: &str, path: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header(HOST, host)
        .body(body.into())
        .unwrap()
}

fn worker_json(host: &str, addr: SocketAddr) -> String {
    format!(
        r#"{{"Host":"{}","Address":"{}","Port":{},"HealthcheckPath":"/health"}}"#,
        host,
        addr.ip(),
        addr.port()
    )
}

async fn send(handler: &RequestHandler, req: Request<Body>) -> (StatusCode, String) {
    let response = handler.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn get(handler: &RequestHandler, host: &str) -> (StatusCode, String) {
    send(handler, request(Method::GET, host, "/", Body::empty())).await
}

async fn register(handler: &RequestHandler, host: &str, addr: SocketAddr) -> (StatusCode, String) {
    send(
        handler,
        request(Method::POST, host, "/_balancer/workers", worker_json(host, addr)),
    )
    .await
}

async fn deregister(handler: &RequestHandler, host: &str, addr: SocketAddr) -> (StatusCode, String) {
    send(
        handler,
        request(Method::DELETE, host, "/_balancer/workers", worker_json(host, addr)),
    )
    .await
}

/// A mock worker answering `GET /` with its own name.
async fn named_backend(name: &str) -> (mockito::ServerGuard, mockito::Mock, SocketAddr) {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .with_status(200)
        .with_body(name)
        .expect_at_least(0)
        .create_async()
        .await;
    let addr = server.host_with_port().parse().unwrap();
    (server, mock, addr)
}

fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_unregistered_host_is_not_found() {
    let (handler, _) = balancer(&config(RotationMode::Deferred));

    let (status, body) = get(&handler, "c.com").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Not found.\n");
}

#[tokio::test]
async fn test_request_without_host_is_rejected() {
    let (handler, _) = balancer(&config(RotationMode::Deferred));
    let req = Request::builder().uri("/").body(Body::empty()).unwrap();

    let (status, _) = send(&handler, req).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_registration_through_empty_host_then_single_worker_serves_all() {
    let (handler, registry) = balancer(&config(RotationMode::Deferred));
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/")
        .with_body("only")
        .expect(3)
        .create_async()
        .await;
    let addr: SocketAddr = server.host_with_port().parse().unwrap();

    let (status, body) = send(
        &handler,
        request(Method::POST, "a.com", "/", worker_json("a.com", addr)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        format!(
            "added worker {} to workers for host a.com. There are now 1 workers for a.com\n",
            addr.ip()
        )
    );

    for _ in 0..3 {
        assert_eq!(get(&handler, "a.com").await, (StatusCode::OK, "only".to_string()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.position("a.com"), 0);
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_admin_prefix_reaches_active_host() {
    let (handler, registry) = balancer(&config(RotationMode::Deferred));
    let (_s0, _m0, w0) = named_backend("w0").await;
    let (_s1, _m1, w1) = named_backend("w1").await;

    register(&handler, "a.com", w0).await;
    let (status, body) = register(&handler, "a.com", w1).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.ends_with("There are now 2 workers for a.com\n"), "{body}");

    // With workers present, a POST to a regular path is proxied, not registered.
    let (_, body) = send(
        &handler,
        request(Method::POST, "a.com", "/", worker_json("a.com", closed_port())),
    )
    .await;
    assert!(!body.starts_with("added worker"), "{body}");
    assert_eq!(registry.len("a.com"), 2);
}

#[tokio::test]
async fn test_duplicate_registration_keeps_count() {
    let (handler, registry) = balancer(&config(RotationMode::Deferred));
    let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();

    register(&handler, "a.com", addr).await;
    let (status, body) = register(&handler, "a.com", addr).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        "detected duplicate worker 10.0.0.1 for host a.com. There are still 1 workers for a.com\n"
    );
    assert_eq!(registry.len("a.com"), 1);
}

#[tokio::test]
async fn test_same_worker_under_two_hosts() {
    let (handler, registry) = balancer(&config(RotationMode::Deferred));
    let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();

    let (_, first) = register(&handler, "a.com", addr).await;
    let (_, second) = register(&handler, "b.com", addr).await;

    assert!(first.starts_with("added worker"));
    assert!(second.starts_with("added worker"));
    assert_eq!(registry.len("a.com"), 1);
    assert_eq!(registry.len("b.com"), 1);
}

#[tokio::test]
async fn test_invalid_registration_body() {
    let (handler, registry) = balancer(&config(RotationMode::Deferred));

    let (status, body) = send(
        &handler,
        request(Method::POST, "a.com", "/_balancer/workers", "{not json"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Invalid post data");

    // The occupancy-keyed route validates the same way.
    let (status, body) = send(&handler, request(Method::POST, "a.com", "/", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Invalid post data");
    assert!(registry.snapshot().is_empty());
}

#[tokio::test]
async fn test_removing_unknown_worker_is_noop() {
    let (handler, registry) = balancer(&config(RotationMode::Deferred));
    register(&handler, "a.com", "10.0.0.1:9000".parse().unwrap()).await;

    let (status, body) = deregister(&handler, "a.com", "10.0.0.9:9000".parse().unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        "removed worker 10.0.0.9 from workers for host a.com. There are now 1 workers for a.com\n"
    );
    assert_eq!(registry.len("a.com"), 1);
}

#[tokio::test]
async fn test_sequential_round_robin_atomic() {
    let (handler, _) = balancer(&config(RotationMode::Atomic));
    let (_s0, _m0, w0) = named_backend("w0").await;
    let (_s1, _m1, w1) = named_backend("w1").await;
    let (_s2, _m2, w2) = named_backend("w2").await;
    for addr in [w0, w1, w2] {
        register(&handler, "a.com", addr).await;
    }

    let mut seen = Vec::new();
    for _ in 0..6 {
        let (status, body) = get(&handler, "a.com").await;
        assert_eq!(status, StatusCode::OK);
        seen.push(body);
    }

    assert_eq!(seen, ["w0", "w1", "w2", "w0", "w1", "w2"]);
}

#[tokio::test]
async fn test_sequential_round_robin_deferred() {
    let (handler, registry) = balancer(&config(RotationMode::Deferred));
    let (_s0, _m0, w0) = named_backend("w0").await;
    let (_s1, _m1, w1) = named_backend("w1").await;
    let (_s2, _m2, w2) = named_backend("w2").await;
    for addr in [w0, w1, w2] {
        register(&handler, "a.com", addr).await;
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let (_, body) = get(&handler, "a.com").await;
        seen.push(body);
        // Give the spawned advance a chance to land before the next request.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(seen, ["w0", "w1", "w2"]);
    assert_eq!(registry.position("a.com"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_atomic_is_exactly_balanced() {
    let (handler, _) = balancer(&config(RotationMode::Atomic));
    let (_s0, _m0, w0) = named_backend("w0").await;
    let (_s1, _m1, w1) = named_backend("w1").await;
    let (_s2, _m2, w2) = named_backend("w2").await;
    for addr in [w0, w1, w2] {
        register(&handler, "a.com", addr).await;
    }

    let tasks: Vec<_> = (0..30)
        .map(|_| {
            let handler = handler.clone();
            tokio::spawn(async move { get(&handler, "a.com").await })
        })
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for task in tasks {
        let (status, body) = task.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        *counts.entry(body).or_default() += 1;
    }

    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&n| n == 10), "{counts:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deferred_serves_every_request() {
    let (handler, registry) = balancer(&config(RotationMode::Deferred));
    let (_s0, _m0, w0) = named_backend("w0").await;
    let (_s1, _m1, w1) = named_backend("w1").await;
    let (_s2, _m2, w2) = named_backend("w2").await;
    for addr in [w0, w1, w2] {
        register(&handler, "a.com", addr).await;
    }

    // Waves of two concurrent requests. Both advances land before the next
    // wave, so waves start on workers 0, 2, 1, 0, ... and the first request
    // of a wave always gets the worker it starts on.
    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..15 {
        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let handler = handler.clone();
                tokio::spawn(async move { get(&handler, "a.com").await })
            })
            .collect();
        for task in tasks {
            let (status, body) = task.await.unwrap();
            assert_eq!(status, StatusCode::OK);
            *counts.entry(body).or_default() += 1;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(counts.values().sum::<usize>(), 30);
    assert!(counts.keys().all(|name| ["w0", "w1", "w2"].contains(&name.as_str())));
    for name in ["w0", "w1", "w2"] {
        let served = counts.get(name).copied().unwrap_or(0);
        assert!(served >= 5, "{name} served {served} of 30: {counts:?}");
    }
    assert_eq!(registry.position("a.com"), 0);
}

#[tokio::test]
async fn test_remove_first_of_two_keeps_second_selectable() {
    let (handler, registry) = balancer(&config(RotationMode::Atomic));
    let (_s0, _m0, w0) = named_backend("w0").await;
    let (_s1, _m1, w1) = named_backend("w1").await;
    register(&handler, "b.com", w0).await;
    register(&handler, "b.com", w1).await;

    assert_eq!(get(&handler, "b.com").await.1, "w0");
    assert_eq!(registry.position("b.com"), 1);

    let (status, body) = deregister(&handler, "b.com", w0).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.ends_with("There are now 1 workers for b.com\n"), "{body}");
    assert_eq!(registry.position("b.com"), 0);

    for _ in 0..2 {
        assert_eq!(get(&handler, "b.com").await, (StatusCode::OK, "w1".to_string()));
    }
}

#[tokio::test]
async fn test_emptied_host_accepts_registration_again() {
    let (handler, registry) = balancer(&config(RotationMode::Deferred));
    let (_s0, _m0, w0) = named_backend("w0").await;
    register(&handler, "a.com", w0).await;

    deregister(&handler, "a.com", w0).await;
    assert_eq!(get(&handler, "a.com").await.0, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &handler,
        request(Method::POST, "a.com", "/", worker_json("a.com", w0)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("added worker"), "{body}");
    assert_eq!(registry.len("a.com"), 1);
    assert_eq!(get(&handler, "a.com").await.1, "w0");
}

#[tokio::test]
async fn test_unreachable_worker_is_internal_error_and_keeps_cursor() {
    let (handler, registry) = balancer(&config(RotationMode::Deferred));
    let (_s1, _m1, live) = named_backend("live").await;
    register(&handler, "a.com", closed_port()).await;
    register(&handler, "a.com", live).await;

    let (status, body) = get(&handler, "a.com").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Internal Server Error.\n");
    assert_eq!(registry.position("a.com"), 0);
}

#[tokio::test]
async fn test_undialable_address_is_rejected_at_registration() {
    let (handler, registry) = balancer(&config(RotationMode::Deferred));
    let (_s0, _m0, live) = named_backend("live").await;

    let (status, body) = send(
        &handler,
        request(
            Method::POST,
            "a.com",
            "/_balancer/workers",
            r#"{"Host":"a.com","Address":"bad host","Port":80}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Invalid post data");

    register(&handler, "a.com", live).await;
    for _ in 0..3 {
        assert_eq!(get(&handler, "a.com").await, (StatusCode::OK, "live".to_string()));
    }
    assert_eq!(registry.len("a.com"), 1);
}

#[tokio::test]
async fn test_slow_worker_times_out() {
    let mut config = config(RotationMode::Deferred);
    config.upstream.timeout_ms = 200;
    let (handler, _) = balancer(&config);

    // Accepts connections and never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hold = tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            open.push(stream);
        }
    });
    register(&handler, "slow.com", addr).await;

    let started = std::time::Instant::now();
    let (status, body) = get(&handler, "slow.com").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Internal Server Error.\n");
    assert!(started.elapsed() < Duration::from_secs(2));
    hold.abort();
}

#[tokio::test]
async fn test_method_path_body_and_status_are_forwarded() {
    let (handler, _) = balancer(&config(RotationMode::Deferred));
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/items")
        .match_body("payload")
        .with_status(201)
        .with_header("content-type", "text/plain")
        .with_body("created")
        .create_async()
        .await;
    register(&handler, "a.com", server.host_with_port().parse().unwrap()).await;

    let response = handler
        .clone()
        .oneshot(request(Method::POST, "a.com", "/api/items", "payload"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["content-type"], "text/plain");
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(bytes, "created");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_admin_listing() {
    let (handler, _) = balancer(&config(RotationMode::Deferred));
    register(&handler, "a.com", "10.0.0.1:9000".parse().unwrap()).await;

    let (status, body) = send(
        &handler,
        request(Method::GET, "anything", "/_balancer/workers", Body::empty()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let listing: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(listing[0]["host"], "a.com");
    assert_eq!(listing[0]["workers"][0]["Port"], 9000);
    assert_eq!(listing[0]["workers"][0]["HealthcheckPath"], "/health");
}

#[tokio::test]
async fn test_end_to_end_over_tcp() {
    let mut config = config(RotationMode::Deferred);
    config.server.listen = "127.0.0.1:0".parse().unwrap();
    let (handler, _) = balancer(&config);
    let (_s0, _m0, w0) = named_backend("w0").await;

    let server = ServerBuilder::new(config.server.listen)
        .with_handler(handler)
        .bind()
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve_with_shutdown(async {
        let _ = stop_rx.await;
    }));

    let client = hyper::Client::new();
    let registration = Request::builder()
        .method(Method::POST)
        .uri(format!("http://{}/", addr))
        .header(HOST, "a.com")
        .body(Body::from(worker_json("a.com", w0)))
        .unwrap();
    let response = client.request(registration).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let proxied = Request::builder()
        .uri(format!("http://{}/", addr))
        .header(HOST, "a.com:8081")
        .body(Body::empty())
        .unwrap();
    let response = client.request(proxied).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(bytes, "w0");

    stop_tx.send(()).unwrap();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_request() {
    let mut config = config(RotationMode::Deferred);
    config.server.listen = "127.0.0.1:0".parse().unwrap();
    let (handler, _) = balancer(&config);

    // Answers every request after a delay.
    let backend = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        while let Ok((mut stream, _)) = backend.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                tokio::time::sleep(Duration::from_millis(300)).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 4\r\nconnection: close\r\n\r\nslow")
                    .await;
            });
        }
    });
    register(&handler, "a.com", backend_addr).await;

    let server = ServerBuilder::new(config.server.listen)
        .with_handler(handler)
        .with_shutdown_timeout(Duration::from_secs(5))
        .bind()
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve_with_shutdown(async {
        let _ = stop_rx.await;
    }));

    let started = std::time::Instant::now();
    let in_flight = tokio::spawn(async move {
        let request = Request::builder()
            .uri(format!("http://{}/", addr))
            .header(HOST, "a.com")
            .body(Body::empty())
            .unwrap();
        let response = hyper::Client::new().request(request).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, bytes)
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(()).unwrap();
    serving.await.unwrap().unwrap();

    assert!(
        started.elapsed() >= Duration::from_millis(250),
        "server stopped before the in-flight request finished"
    );
    let (status, bytes) = in_flight.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, "slow");
}
