//! Token endpoint exchanges.
//!
//! Both grants run under the credential write lock, so concurrent readers of the token
//! either see the old pair or the new one, never a mix. State changes only when the
//! endpoint answers with a success status and a well-formed payload.

use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use crate::auth::credentials::{CredentialSnapshot, CredentialState, TokenResponse};
use crate::auth::gate::AccessGate;
use crate::error::{ApiError, ApiResult, OtherError};
use crate::executor::Executor;
use crate::observability::metrics::get_metrics;
use crate::request::ApiRequest;
use crate::transport::Transport;
use crate::utils::constants::{GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN};

static RESULT_OK: &str = "ok";
static RESULT_ERROR: &str = "error";

/// Receives the outcome of every refresh/authenticate call, e.g. to persist the new pair.
pub trait RefreshObserver: Send + Sync {
    fn on_refresh_success(&self, snapshot: &CredentialSnapshot);
    fn on_refresh_failure(&self, error: &ApiError);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RefreshObserver for NoopObserver {
    fn on_refresh_success(&self, _: &CredentialSnapshot) {}
    fn on_refresh_failure(&self, _: &ApiError) {}
}

/// Logs refresh outcomes without the token values.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RefreshObserver for TracingObserver {
    fn on_refresh_success(&self, snapshot: &CredentialSnapshot) {
        info!(expires = snapshot.expires, last_refresh = %snapshot.last_refresh, "credentials refreshed");
    }

    fn on_refresh_failure(&self, error: &ApiError) {
        warn!(error = %error, "credential refresh failed");
    }
}

#[derive(Debug, Clone)]
pub enum Grant {
    RefreshToken(String),
    AuthorizationCode(String),
}

impl Grant {
    pub fn name(&self) -> &'static str {
        match self {
            Grant::RefreshToken(_) => GRANT_REFRESH_TOKEN,
            Grant::AuthorizationCode(_) => GRANT_AUTHORIZATION_CODE,
        }
    }

    fn credential(&self) -> (&'static str, &str) {
        match self {
            Grant::RefreshToken(token) => ("refresh_token", token),
            Grant::AuthorizationCode(code) => ("code", code),
        }
    }
}

#[derive(Clone)]
pub struct TokenEndpoint {
    url: Url,
    client_id: String,
    client_secret: String,
}

impl std::fmt::Debug for TokenEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEndpoint")
            .field("url", &self.url.as_str())
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl TokenEndpoint {
    pub fn new(url: Url, client_id: String, client_secret: String) -> Self {
        Self { url, client_id, client_secret }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn exchange<T: Transport>(
        &self,
        executor: &Executor<T>,
        grant: &Grant,
        attempts: u32,
    ) -> ApiResult<TokenResponse> {
        let (credential_key, credential) = grant.credential();
        let request = ApiRequest::post(self.url.clone())
            .form_body([
                ("grant_type", grant.name()),
                (credential_key, credential),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .unauthenticated();

        let response = executor.send(&Arc::new(request), None, attempts).await?.error_for_status()?;
        let token: TokenResponse = response.json()?;
        if token.access_token.is_empty() {
            return Err(OtherError::decode("token endpoint returned an empty access token")
                .with_status(response.status())
                .into());
        }
        Ok(token)
    }
}

impl AccessGate {
    /// Exchange the refresh token for a new pair.
    pub async fn refresh<T: Transport>(&self, executor: &Executor<T>) -> ApiResult<()> {
        let mut state = self.credentials.write().await;
        self.refresh_locked(&mut state, executor).await
    }

    /// Exchange an authorization code for the first token pair.
    pub async fn authenticate<T: Transport>(&self, executor: &Executor<T>, code: &str) -> ApiResult<()> {
        let mut state = self.credentials.write().await;
        if state.is_token_only() {
            let err = ApiError::from(OtherError::auth(
                "authenticate is not available for a client built from an access token",
            ));
            self.observer.on_refresh_failure(&err);
            return Err(err);
        }
        self.exchange_locked(&mut state, executor, Grant::AuthorizationCode(code.to_owned())).await
    }

    /// Refresh unless a concurrent caller already did while we waited for the write lock.
    pub(crate) async fn refresh_if_stale<T: Transport>(&self, executor: &Executor<T>) -> ApiResult<()> {
        let mut state = self.credentials.write().await;
        if !(state.can_refresh() && state.needs_refresh(self.margin_secs)) {
            info!("access token was refreshed by a concurrent caller");
            return Ok(());
        }
        self.refresh_locked(&mut state, executor).await
    }

    async fn refresh_locked<T: Transport>(
        &self,
        state: &mut CredentialState,
        executor: &Executor<T>,
    ) -> ApiResult<()> {
        let Some(refresh_token) = state.refresh_token().filter(|t| !t.is_empty()).map(str::to_owned) else {
            let err = ApiError::from(OtherError::auth("no refresh token available"));
            self.observer.on_refresh_failure(&err);
            return Err(err);
        };
        self.exchange_locked(state, executor, Grant::RefreshToken(refresh_token)).await
    }

    async fn exchange_locked<T: Transport>(
        &self,
        state: &mut CredentialState,
        executor: &Executor<T>,
        grant: Grant,
    ) -> ApiResult<()> {
        info!(grant = grant.name(), url = %self.endpoint.url(), "exchanging credentials at token endpoint");
        let result = self.endpoint.exchange(executor, &grant, state.max_request_attempts()).await;
        let metrics = get_metrics().await;

        match result {
            Ok(token) => {
                state.apply(token);
                metrics.token_refreshes.with_label_values(&[grant.name(), RESULT_OK]).inc();
                info!(grant = grant.name(), expires_in = state.expires_in(), "token exchange succeeded");
                self.observer.on_refresh_success(&state.snapshot());
                Ok(())
            }
            Err(err) => {
                metrics.token_refreshes.with_label_values(&[grant.name(), RESULT_ERROR]).inc();
                warn!(grant = grant.name(), error = %err, "token exchange failed, credentials unchanged");
                self.observer.on_refresh_failure(&err);
                Err(err)
            }
        }
    }
}
