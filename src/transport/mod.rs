//! Transport seam.
//!
//! A [`Transport`] performs exactly one physical HTTP exchange and hands back the fully
//! drained response. Everything above it (auth, retry, redirects, batching) is
//! transport-agnostic, which lets tests swap in scripted or instrumented transports.

use anyhow::Result;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

pub mod http_pool;

pub use http_pool::{shared_pool, HttpTransport};

#[derive(Debug, Clone)]
pub struct PhysicalRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Response of one physical exchange, body already read to the end.
#[derive(Debug, Clone)]
pub struct PhysicalResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl PhysicalResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self { status, headers, body: body.into() }
    }
}

pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: PhysicalRequest,
    ) -> impl std::future::Future<Output = Result<PhysicalResponse>> + Send;
}
