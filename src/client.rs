//! Client facade: one shared credential, one executor, two primitives.

use std::sync::Arc;

use tracing::info;
use url::Url;

use crate::auth::credentials::{CredentialSnapshot, CredentialState};
use crate::auth::gate::{AccessGate, TokenLease};
use crate::auth::refresh::{NoopObserver, RefreshObserver, TokenEndpoint};
use crate::batch::{BatchExecutor, BatchResponse};
use crate::config::settings::ClientSettings;
use crate::error::{ApiError, ApiResult, OtherError};
use crate::executor::Executor;
use crate::request::{ApiRequest, ApiResponse};
use crate::resilience::retry::RetrySettings;
use crate::transport::{HttpTransport, Transport};

/// How the client obtains its first credential.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Pre-issued token; never refreshed.
    AccessToken(String),
    TokenPair {
        access_token: String,
        refresh_token: String,
        expires_in: u64,
    },
    /// Nothing yet; call [`ApiClient::authenticate`] with an authorization code.
    Pending,
    Snapshot(CredentialSnapshot),
}

pub struct ApiClient<T: Transport = HttpTransport> {
    base_url: Url,
    batch_url: Url,
    executor: Executor<T>,
    gate: AccessGate,
}

impl ApiClient<HttpTransport> {
    /// Client over the process-wide connection pool.
    pub async fn connect(settings: &ClientSettings, credentials: Credentials) -> ApiResult<Self> {
        let transport = HttpTransport::shared()
            .await
            .map_err(|e| OtherError::transport("cannot initialize the shared connection pool", e))?;
        Self::with_transport(settings, transport, credentials)
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn with_transport(settings: &ClientSettings, transport: T, credentials: Credentials) -> ApiResult<Self> {
        let base_url = settings.base_url().map_err(invalid_settings)?;
        let batch_url = settings.batch_url().map_err(invalid_settings)?;
        let token_url = settings.token_url().map_err(invalid_settings)?;

        let state = match credentials {
            Credentials::AccessToken(token) => {
                if token.is_empty() {
                    return Err(OtherError::auth("access token must not be empty").into());
                }
                let mut state = CredentialState::from_access_token(token);
                state.set_max_request_attempts(settings.max_attempts());
                state
            }
            Credentials::TokenPair { access_token, refresh_token, expires_in } => {
                if access_token.is_empty() {
                    return Err(OtherError::auth("access token must not be empty").into());
                }
                let mut state = CredentialState::from_token_pair(access_token, refresh_token, expires_in);
                state.set_max_request_attempts(settings.max_attempts());
                state
            }
            Credentials::Pending => {
                let mut state = CredentialState::pending();
                state.set_max_request_attempts(settings.max_attempts());
                state
            }
            Credentials::Snapshot(snapshot) => CredentialState::from_snapshot(snapshot),
        };

        let endpoint = TokenEndpoint::new(
            token_url,
            settings.credentials.client_id.clone(),
            settings.credentials.client_secret.clone(),
        );
        let gate = AccessGate::new(
            state,
            endpoint,
            Arc::new(NoopObserver),
            settings.refresh_margin_seconds,
        );
        let retry = RetrySettings::new(settings.max_attempts(), settings.base_delay_ms());
        let executor = Executor::new(transport, retry, settings.user_agent(), settings.max_redirects)?;

        info!(base_url = %base_url, "api client ready");
        Ok(Self { base_url, batch_url, executor, gate })
    }

    /// Install the observer notified after every refresh/authenticate call.
    pub fn with_observer(mut self, observer: Arc<dyn RefreshObserver>) -> Self {
        self.gate.set_observer(observer);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `base_url` joined with `path`, e.g. `endpoint("folders/0")`.
    pub fn endpoint(&self, path: &str) -> ApiResult<Url> {
        let raw = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&raw).map_err(|e| {
            OtherError::request(format!("cannot build endpoint url for '{path}'"))
                .with_source(e)
                .into()
        })
    }

    pub fn executor(&self) -> &Executor<T> {
        &self.executor
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    /// Execute a single request. Any status is returned as a response; use
    /// [`ApiResponse::error_for_status`] to turn failures into errors.
    pub async fn execute(&self, request: impl Into<Arc<ApiRequest>>) -> ApiResult<ApiResponse> {
        self.executor.execute(&self.gate, request.into()).await
    }

    /// Execute requests as one batch call; responses come back in input order.
    pub async fn execute_batch<I, R>(&self, requests: I) -> ApiResult<BatchResponse>
    where
        I: IntoIterator<Item = R>,
        R: Into<Arc<ApiRequest>>,
    {
        let requests: Vec<Arc<ApiRequest>> = requests.into_iter().map(Into::into).collect();
        BatchExecutor::new(&self.executor, &self.gate, &self.base_url, &self.batch_url)
            .execute(requests)
            .await
    }

    /// Exclusive use of the current token, refreshing first when it is about to expire.
    pub async fn acquire(&self) -> ApiResult<TokenLease> {
        self.gate.acquire(&self.executor).await
    }

    pub async fn refresh(&self) -> ApiResult<()> {
        self.gate.refresh(&self.executor).await
    }

    pub async fn authenticate(&self, authorization_code: &str) -> ApiResult<()> {
        self.gate.authenticate(&self.executor, authorization_code).await
    }

    pub async fn needs_refresh(&self) -> bool {
        self.gate.needs_refresh().await
    }

    pub async fn can_refresh(&self) -> bool {
        self.gate.can_refresh().await
    }

    pub async fn set_max_request_attempts(&self, attempts: u32) {
        self.gate.set_max_request_attempts(attempts).await
    }

    pub async fn snapshot(&self) -> CredentialSnapshot {
        self.gate.snapshot().await
    }

    /// Serialize the credential state to its JSON snapshot.
    pub async fn save_state(&self) -> ApiResult<String> {
        self.snapshot().await.to_json().map_err(|e| {
            OtherError::decode("credential snapshot cannot be serialized")
                .with_source(e)
                .into()
        })
    }

    /// Replace the credential state with a JSON snapshot produced by [`ApiClient::save_state`].
    pub async fn restore_state(&self, state: &str) -> ApiResult<()> {
        let snapshot = CredentialSnapshot::from_json(state).map_err(|e| {
            ApiError::from(
                OtherError::decode("credential snapshot is malformed").with_source(e),
            )
        })?;
        self.gate.restore(snapshot).await;
        Ok(())
    }
}

fn invalid_settings(err: anyhow::Error) -> ApiError {
    OtherError::request("invalid client settings").with_source(err).into()
}
