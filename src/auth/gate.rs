use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use crate::auth::credentials::{CredentialSnapshot, CredentialState};
use crate::auth::refresh::{RefreshObserver, TokenEndpoint};
use crate::error::{ApiResult, OtherError};
use crate::executor::Executor;
use crate::helpers::time::get_instant;
use crate::observability::metrics::get_metrics;
use crate::transport::Transport;

/// Single choke point for authenticated traffic.
///
/// Credential mutation goes through a read/write lock: the staleness check takes the read
/// side, a refresh takes the write side. Token *use* goes through a separate exclusive
/// lock that a [`TokenLease`] holds for an entire physical round trip, so at most one
/// authenticated exchange per client is in flight at any time.
pub struct AccessGate {
    pub(crate) credentials: RwLock<CredentialState>,
    usage: Arc<Mutex<()>>,
    pub(crate) endpoint: TokenEndpoint,
    pub(crate) observer: Arc<dyn RefreshObserver>,
    pub(crate) margin_secs: u64,
}

impl AccessGate {
    pub fn new(
        state: CredentialState,
        endpoint: TokenEndpoint,
        observer: Arc<dyn RefreshObserver>,
        margin_secs: u64,
    ) -> Self {
        Self {
            credentials: RwLock::new(state),
            usage: Arc::new(Mutex::new(())),
            endpoint,
            observer,
            margin_secs,
        }
    }

    pub(crate) fn set_observer(&mut self, observer: Arc<dyn RefreshObserver>) {
        self.observer = observer;
    }

    /// Refresh if needed, then take exclusive use of the current access token.
    ///
    /// A failed refresh is returned as-is and nothing is granted.
    pub async fn acquire<T: Transport>(&self, executor: &Executor<T>) -> ApiResult<TokenLease> {
        let stale = {
            let state = self.credentials.read().await;
            state.can_refresh() && state.needs_refresh(self.margin_secs)
        };
        if stale {
            info!("access token is within the refresh margin, refreshing");
            self.refresh_if_stale(executor).await?;
        }

        let started = get_instant();
        let hold = Arc::clone(&self.usage).lock_owned().await;
        let waited = started.elapsed();
        get_metrics().await.gate_wait.observe(waited.as_secs_f64());
        debug!(?waited, "token lease granted");

        let state = self.credentials.read().await;
        let token = state
            .access_token()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OtherError::auth("client is not authenticated"))?
            .to_owned();

        Ok(TokenLease { token, max_attempts: state.max_request_attempts(), _hold: hold })
    }

    pub async fn needs_refresh(&self) -> bool {
        self.credentials.read().await.needs_refresh(self.margin_secs)
    }

    pub async fn can_refresh(&self) -> bool {
        self.credentials.read().await.can_refresh()
    }

    pub async fn max_request_attempts(&self) -> u32 {
        self.credentials.read().await.max_request_attempts()
    }

    pub async fn set_max_request_attempts(&self, attempts: u32) {
        self.credentials.write().await.set_max_request_attempts(attempts);
    }

    pub async fn snapshot(&self) -> CredentialSnapshot {
        self.credentials.read().await.snapshot()
    }

    pub async fn restore(&self, snapshot: CredentialSnapshot) {
        *self.credentials.write().await = CredentialState::from_snapshot(snapshot);
        info!("credentials restored from snapshot");
    }
}

impl fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGate")
            .field("endpoint", &self.endpoint)
            .field("margin_secs", &self.margin_secs)
            .finish_non_exhaustive()
    }
}

/// Exclusive use of the access token. Dropping it releases the gate.
pub struct TokenLease {
    token: String,
    max_attempts: u32,
    _hold: OwnedMutexGuard<()>,
}

impl TokenLease {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Attempt bound in force when the lease was granted.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn release(self) {}
}

impl fmt::Debug for TokenLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenLease").field("token", &"<redacted>").finish()
    }
}
