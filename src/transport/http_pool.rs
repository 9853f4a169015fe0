use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::{redirect, Client};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::transport::{PhysicalRequest, PhysicalResponse, Transport};
use crate::utils::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_POOL_IDLE_TIMEOUT_MS, DEFAULT_POOL_MAX_IDLE_PER_HOST,
};

// One keep-alive pool per process, shared by every client instance.
static POOL_INSTANCE: OnceCell<Client> = OnceCell::const_new();

/// Lazily builds and returns the process-wide pooled HTTP client.
pub async fn shared_pool() -> Result<&'static Client> {
    POOL_INSTANCE
        .get_or_try_init(|| async {
            info!("Initializing shared HTTP connection pool ...");
            Client::builder()
                // redirects are followed by the executor so the budget is per request
                .redirect(redirect::Policy::none())
                .connect_timeout(Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS))
                .pool_idle_timeout(Duration::from_millis(DEFAULT_POOL_IDLE_TIMEOUT_MS))
                .pool_max_idle_per_host(DEFAULT_POOL_MAX_IDLE_PER_HOST)
                .build()
                .map_err(|e| anyhow!("failed to build HTTP client: {e}"))
        })
        .await
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Transport over the shared process-wide pool.
    pub async fn shared() -> Result<Self> {
        Ok(Self { client: shared_pool().await?.clone() })
    }

    /// Transport over a caller-provided client. The client should not follow redirects.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: PhysicalRequest) -> Result<PhysicalResponse> {
        let PhysicalRequest { method, url, headers, body } = request;
        debug!(%method, %url, "sending request");

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        // drain fully so the connection goes back to the pool
        let body = response.bytes().await?;
        Ok(PhysicalResponse { status, headers, body })
    }
}
