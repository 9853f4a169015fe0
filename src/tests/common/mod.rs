// src/tests/common/mod.rs
pub use axum::Router;
pub use serde_json::json;
pub use tokio::task::JoinHandle;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::auth::{CredentialSnapshot, RefreshObserver};
use crate::config::settings::ClientSettings;
use crate::error::ApiError;
use crate::transport::{PhysicalRequest, PhysicalResponse, Transport};

/// Spawn an Axum router on an ephemeral port and return (JoinHandle, SocketAddr)
pub async fn spawn_axum(router: Router) -> (JoinHandle<()>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    (handle, addr)
}

/// Settings pointing at `base_url` with fast retries.
pub fn test_settings(base_url: &str) -> ClientSettings {
    let mut settings = ClientSettings::new(base_url, "client-id", "client-secret");
    settings.retry.base_delay_ms = Some(10);
    settings
}

pub fn response(status: u16, body: &str) -> Result<PhysicalResponse> {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    Ok(PhysicalResponse::new(StatusCode::from_u16(status)?, headers, body.to_owned()))
}

pub fn response_with(status: u16, name: &'static str, value: &'static str) -> Result<PhysicalResponse> {
    let mut headers = HeaderMap::new();
    headers.insert(name, HeaderValue::from_static(value));
    Ok(PhysicalResponse::new(StatusCode::from_u16(status)?, headers, Vec::new()))
}

pub fn transport_error(message: &str) -> Result<PhysicalResponse> {
    Err(anyhow!("{}", message.to_owned()))
}

/// Replays a fixed script of outcomes and records every physical request it sees.
/// Once the script runs out it answers `200 {}`.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<PhysicalResponse>>>,
    sent: Mutex<Vec<PhysicalRequest>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<PhysicalResponse>>) -> Self {
        Self { script: Mutex::new(script.into()), ..Default::default() }
    }

    /// Every exchange takes `latency`, which makes overlapping exchanges observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<PhysicalRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: PhysicalRequest) -> Result<PhysicalResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.sent.lock().unwrap().push(request);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or_else(|| response(200, "{}"))
    }
}

/// Counts refresh callbacks and remembers the last snapshot delivered.
#[derive(Default)]
pub struct CountingObserver {
    pub successes: AtomicUsize,
    pub failures: AtomicUsize,
    pub last_snapshot: Mutex<Option<CredentialSnapshot>>,
}

impl CountingObserver {
    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl RefreshObserver for CountingObserver {
    fn on_refresh_success(&self, snapshot: &CredentialSnapshot) {
        self.successes.fetch_add(1, Ordering::SeqCst);
        *self.last_snapshot.lock().unwrap() = Some(snapshot.clone());
    }

    fn on_refresh_failure(&self, _: &ApiError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// Real HTTP transport with its own pool, so connections never outlive the test runtime.
pub fn http_transport() -> crate::transport::HttpTransport {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(5))
        .build()
        .expect("reqwest client");
    crate::transport::HttpTransport::with_client(client)
}
