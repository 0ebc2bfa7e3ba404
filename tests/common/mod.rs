//! In-process stand-in for the stream-tester's HTTP API.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, RawQuery, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: &'static str,
    pub query: Option<String>,
    pub body: String,
}

struct Inner {
    start_status: StatusCode,
    start_body: String,
    stop_status: StatusCode,
    stats: HashMap<String, Value>,
    requests: Vec<Recorded>,
    delay: Duration,
}

#[derive(Clone)]
pub struct MockHarness {
    pub addr: SocketAddr,
    inner: Arc<Mutex<Inner>>,
}

impl MockHarness {
    /// Bind on an ephemeral port. Starts answer `run-1` until told otherwise.
    pub async fn spawn() -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            start_status: StatusCode::OK,
            start_body: r#"{"success":true,"base_manifest_id":"run-1"}"#.to_string(),
            stop_status: StatusCode::OK,
            stats: HashMap::new(),
            requests: Vec::new(),
            delay: Duration::ZERO,
        }));

        let app = Router::new()
            .route("/start_streams", post(start_streams))
            .route("/stats", get(stats))
            .route("/stop", get(stop))
            .with_state(inner.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, inner }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn respond_to_start(&self, status: StatusCode, body: &str) {
        let mut inner = self.inner.lock();
        inner.start_status = status;
        inner.start_body = body.to_string();
    }

    pub fn respond_to_stop(&self, status: StatusCode) {
        self.inner.lock().stop_status = status;
    }

    /// Hold every start and stats answer back by `delay`.
    pub fn delay_responses(&self, delay: Duration) {
        self.inner.lock().delay = delay;
    }

    pub fn set_stats(&self, id: &str, stats: Value) {
        self.inner.lock().stats.insert(id.to_string(), stats);
    }

    pub fn requests(&self, path: &str) -> Vec<Recorded> {
        self.inner
            .lock()
            .requests
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

type Shared = Arc<Mutex<Inner>>;

async fn start_streams(State(inner): State<Shared>, body: String) -> (StatusCode, String) {
    let (delay, reply) = {
        let mut inner = inner.lock();
        inner.requests.push(Recorded {
            path: "/start_streams",
            query: None,
            body,
        });
        (inner.delay, (inner.start_status, inner.start_body.clone()))
    };
    tokio::time::sleep(delay).await;
    reply
}

async fn stats(
    State(inner): State<Shared>,
    RawQuery(raw): RawQuery,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let (delay, found) = {
        let mut inner = inner.lock();
        inner.requests.push(Recorded {
            path: "/stats",
            query: raw,
            body: String::new(),
        });
        let found = params
            .get("base_manifest_id")
            .and_then(|id| inner.stats.get(id))
            .map(Value::to_string);
        (inner.delay, found)
    };
    tokio::time::sleep(delay).await;
    match found {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::NOT_FOUND, "not found".to_string()),
    }
}

async fn stop(State(inner): State<Shared>) -> StatusCode {
    let mut inner = inner.lock();
    inner.requests.push(Recorded {
        path: "/stop",
        query: None,
        body: String::new(),
    });
    inner.stop_status
}
