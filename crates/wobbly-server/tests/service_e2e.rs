//! End-to-end tests against real listeners on loopback.

use http::StatusCode;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use wobbly_middleware::stages::FaultMode;
use wobbly_middleware::{
    handler_fn, BoxedHandler, FixedRandom, Request, Response, ResponseExt, SeededRandom,
};
use wobbly_server::{
    App, DirectStabler, HttpStabler, LogicRoutes, ReqwestTransport, Server, ServerResult,
    ServiceConfig, ShutdownSignal, StablerKind,
};

struct Running {
    addr: SocketAddr,
    shutdown: ShutdownSignal,
    task: JoinHandle<ServerResult<()>>,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn stop(self) {
        self.shutdown.trigger();
        self.task.await.unwrap().unwrap();
    }
}

async fn start(handler: BoxedHandler, grace: Duration) -> Running {
    let server = Server::bind("logic", "127.0.0.1:0".parse().unwrap(), handler, grace)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = ShutdownSignal::new();
    let task = tokio::spawn(server.run_with_shutdown(shutdown.clone()));
    Running {
        addr,
        shutdown,
        task,
    }
}

fn local_config() -> ServiceConfig {
    ServiceConfig {
        http_addr: "127.0.0.1:0".parse().unwrap(),
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        stabler: StablerKind::Direct,
        max_delay_ms: 0,
        ..ServiceConfig::default()
    }
}

#[tokio::test]
async fn stable_and_not_found_over_http() {
    let app = App::bind(&local_config(), None).await.unwrap();
    let logic = app.logic_addr().unwrap();
    let metrics = app.metrics_addr().unwrap();
    let shutdown = ShutdownSignal::new();
    let task = tokio::spawn(app.run(shutdown.clone()));
    let client = reqwest::Client::new();

    for method in [reqwest::Method::GET, reqwest::Method::POST] {
        let response = client
            .request(method, format!("http://{logic}/stable"))
            .header("correlation-id", "whatever")
            .body("ignored")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "hello world");
    }

    let response = client
        .delete(format!("http://{logic}/other"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "not found");

    let response = client
        .get(format!("http://{metrics}/metrics"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .get(format!("http://{metrics}/stable"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    shutdown.trigger();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn correlation_id_reaches_internal_stable_call() {
    let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let upstream = {
        let seen = Arc::clone(&seen);
        start(
            Arc::new(handler_fn(move |_ctx, request: Request| {
                let id = request
                    .headers()
                    .get("correlation-id")
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                seen.lock().push(id);
                async { Response::text(StatusCode::OK, "hello world") }
            })),
            Duration::from_secs(1),
        )
        .await
    };

    let stabler = HttpStabler::new(
        upstream.url("/stable"),
        ReqwestTransport::new(Some(Duration::from_secs(5))).unwrap(),
    );
    let logic = start(
        LogicRoutes::new(Arc::new(stabler))
            .max_delay(Duration::ZERO)
            .random(Arc::new(FixedRandom::passing()))
            .build(),
        Duration::from_secs(1),
    )
    .await;

    let client = reqwest::Client::new();
    let response = client
        .get(logic.url("/unstable"))
        .header("correlation-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "hello world");

    let response = client.get(logic.url("/unstable")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].as_deref(), Some("abc-123"));
        let generated = seen[1].as_deref().unwrap();
        assert!(!generated.is_empty());
        assert_ne!(generated, "abc-123");
    }

    logic.stop().await;
    upstream.stop().await;
}

#[tokio::test]
async fn unreachable_stable_yields_empty_500() {
    let closed = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let stabler = HttpStabler::new(
        format!("http://{closed}/stable"),
        ReqwestTransport::new(Some(Duration::from_secs(2))).unwrap(),
    );
    let logic = start(
        LogicRoutes::new(Arc::new(stabler))
            .max_delay(Duration::ZERO)
            .random(Arc::new(FixedRandom::passing()))
            .build(),
        Duration::from_secs(1),
    )
    .await;

    let response = reqwest::get(logic.url("/unstable")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.text().await.unwrap().is_empty());

    logic.stop().await;
}

#[tokio::test]
async fn pass_through_unstable_always_succeeds_after_delay() {
    let delay = Duration::from_millis(120);
    let logic = start(
        LogicRoutes::new(Arc::new(DirectStabler))
            .fault_mode(FaultMode::PassThrough)
            .max_delay(Duration::from_secs(1))
            .random(Arc::new(FixedRandom::delaying(delay)))
            .build(),
        Duration::from_secs(1),
    )
    .await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let started = Instant::now();
        let response = client.get(logic.url("/unstable")).send().await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "hello world");
        assert!(elapsed >= delay, "answered after {elapsed:?}");
    }

    logic.stop().await;
}

#[tokio::test]
async fn active_fault_injection_fails_about_half() {
    const TRIALS: usize = 1000;

    let logic = start(
        LogicRoutes::new(Arc::new(DirectStabler))
            .fault_mode(FaultMode::Active { probability: 0.5 })
            .max_delay(Duration::ZERO)
            .random(Arc::new(SeededRandom::new(42)))
            .build(),
        Duration::from_secs(1),
    )
    .await;
    let client = reqwest::Client::new();

    let mut failures = 0;
    for _ in 0..TRIALS {
        let response = client.get(logic.url("/unstable")).send().await.unwrap();
        match response.status() {
            StatusCode::OK => assert_eq!(response.text().await.unwrap(), "hello world"),
            StatusCode::INTERNAL_SERVER_ERROR => {
                assert!(response.text().await.unwrap().is_empty());
                failures += 1;
            }
            other => panic!("unexpected status {other}"),
        }
    }

    let ratio = failures as f64 / TRIALS as f64;
    assert!((0.45..=0.55).contains(&ratio), "failure ratio {ratio}");

    logic.stop().await;
}

/// Starts a handler that signals `entered` and then takes `work` to answer.
async fn start_slow(work: Duration, grace: Duration, entered: Arc<Notify>) -> Running {
    start(
        Arc::new(handler_fn(move |_ctx, _req| {
            let entered = Arc::clone(&entered);
            async move {
                entered.notify_one();
                tokio::time::sleep(work).await;
                Response::text(StatusCode::OK, "done")
            }
        })),
        grace,
    )
    .await
}

#[tokio::test]
async fn shutdown_waits_for_slow_request_within_grace() {
    let grace = Duration::from_secs(2);
    let entered = Arc::new(Notify::new());
    let slow = start_slow(Duration::from_millis(300), grace, Arc::clone(&entered)).await;
    let addr = slow.addr;

    let client = reqwest::Client::new();
    let in_flight = tokio::spawn(client.get(slow.url("/slow")).send());
    entered.notified().await;

    let started = Instant::now();
    slow.shutdown.trigger();
    tokio::time::timeout(grace + Duration::from_millis(500), slow.task)
        .await
        .expect("server did not stop within the grace window")
        .unwrap()
        .unwrap();
    assert!(started.elapsed() < grace);

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "done");

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn shutdown_cuts_request_longer_than_grace() {
    let grace = Duration::from_millis(500);
    let entered = Arc::new(Notify::new());
    let slow = start_slow(Duration::from_secs(10), grace, Arc::clone(&entered)).await;

    let client = reqwest::Client::new();
    let in_flight = tokio::spawn(client.get(slow.url("/slow")).send());
    entered.notified().await;

    let started = Instant::now();
    slow.shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(3), slow.task)
        .await
        .expect("server ignored the grace window")
        .unwrap()
        .unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= grace, "stopped after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "stopped after {elapsed:?}");

    let outcome = tokio::time::timeout(Duration::from_secs(2), in_flight)
        .await
        .expect("client still waiting after the connection was closed")
        .unwrap();
    assert!(outcome.is_err());
}
