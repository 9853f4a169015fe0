use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::helpers::time::{now_millis, truncate_to_millis};
use crate::utils::constants::DEFAULT_MAX_REQUEST_ATTEMPTS;

/// Token payload returned by the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// validity duration in seconds
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub restricted_to: Option<Value>,
}

/// Access/refresh token pair and its validity window.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    last_refresh: DateTime<Utc>,
    expires_in: u64,
    max_request_attempts: u32,
}

impl CredentialState {
    /// Pre-issued token that cannot be refreshed.
    pub fn from_access_token(access_token: String) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token: None,
            last_refresh: now_millis(),
            expires_in: 0,
            max_request_attempts: DEFAULT_MAX_REQUEST_ATTEMPTS,
        }
    }

    pub fn from_token_pair(access_token: String, refresh_token: String, expires_in: u64) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            last_refresh: now_millis(),
            expires_in,
            max_request_attempts: DEFAULT_MAX_REQUEST_ATTEMPTS,
        }
    }

    /// No tokens yet; usable only after an authorization-code exchange.
    pub fn pending() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            last_refresh: now_millis(),
            expires_in: 0,
            max_request_attempts: DEFAULT_MAX_REQUEST_ATTEMPTS,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn last_refresh(&self) -> DateTime<Utc> {
        self.last_refresh
    }

    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    pub fn max_request_attempts(&self) -> u32 {
        self.max_request_attempts
    }

    pub fn set_max_request_attempts(&mut self, attempts: u32) {
        self.max_request_attempts = attempts.max(1);
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Built from a bare access token: there is nothing to exchange an authorization code against.
    pub fn is_token_only(&self) -> bool {
        self.access_token.is_some() && !self.can_refresh()
    }

    pub fn needs_refresh(&self, margin_secs: u64) -> bool {
        self.needs_refresh_at(Utc::now(), margin_secs)
    }

    /// `now - last_refresh >= expires_in - margin`, in whole seconds.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, margin_secs: u64) -> bool {
        let elapsed = (now - self.last_refresh).num_seconds() as i128;
        elapsed >= self.expires_in as i128 - margin_secs as i128
    }

    /// Replace every mutable field at once from a fresh token payload. A payload without a
    /// refresh token keeps the current one.
    pub(crate) fn apply(&mut self, token: TokenResponse) {
        self.access_token = Some(token.access_token);
        if let Some(refresh_token) = token.refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = Some(refresh_token);
        }
        self.last_refresh = now_millis();
        self.expires_in = token.expires_in;
    }

    pub fn snapshot(&self) -> CredentialSnapshot {
        CredentialSnapshot {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            last_refresh: self.last_refresh,
            expires: self.expires_in,
            max_request_attempts: self.max_request_attempts,
        }
    }

    pub fn from_snapshot(snapshot: CredentialSnapshot) -> Self {
        Self {
            access_token: snapshot.access_token.filter(|t| !t.is_empty()),
            refresh_token: snapshot.refresh_token.filter(|t| !t.is_empty()),
            last_refresh: truncate_to_millis(snapshot.last_refresh),
            expires_in: snapshot.expires,
            max_request_attempts: snapshot.max_request_attempts.max(1),
        }
    }
}

/// Persisted form of [`CredentialState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSnapshot {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// epoch milliseconds
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_refresh: DateTime<Utc>,
    /// seconds
    pub expires: u64,
    pub max_request_attempts: u32,
}

impl CredentialSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn issued_at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn state(expires_in: u64) -> CredentialState {
        let mut state = CredentialState::from_token_pair("a".into(), "r".into(), expires_in);
        state.last_refresh = issued_at();
        state
    }

    #[test]
    fn needs_refresh_exactly_at_margin() {
        let state = state(3600);
        let margin = 60;
        assert!(!state.needs_refresh_at(issued_at() + Duration::seconds(3539), margin));
        assert!(state.needs_refresh_at(issued_at() + Duration::seconds(3540), margin));
        assert!(state.needs_refresh_at(issued_at() + Duration::seconds(7200), margin));
    }

    #[test]
    fn short_lived_token_is_always_stale() {
        let state = state(30);
        assert!(state.needs_refresh_at(issued_at(), 60));
    }

    #[test]
    fn fractional_second_below_threshold_is_not_stale() {
        let state = state(3600);
        let just_below = issued_at() + Duration::seconds(3539) + Duration::milliseconds(999);
        assert!(!state.needs_refresh_at(just_below, 60));
    }

    #[test]
    fn apply_replaces_all_mutable_fields() {
        let mut state = state(3600);
        state.apply(TokenResponse {
            access_token: "a2".into(),
            refresh_token: Some("r2".into()),
            expires_in: 4000,
            token_type: Some("bearer".into()),
            restricted_to: None,
        });
        assert_eq!(state.access_token(), Some("a2"));
        assert_eq!(state.refresh_token(), Some("r2"));
        assert_eq!(state.expires_in(), 4000);
        assert!(state.last_refresh() > issued_at());
    }

    #[test]
    fn apply_without_refresh_token_keeps_the_current_one() {
        let mut state = state(3600);
        state.apply(TokenResponse {
            access_token: "a2".into(),
            refresh_token: None,
            expires_in: 3600,
            token_type: None,
            restricted_to: None,
        });
        assert_eq!(state.access_token(), Some("a2"));
        assert_eq!(state.refresh_token(), Some("r"));
        assert!(state.can_refresh());
    }

    #[test]
    fn huge_validity_never_wraps_into_stale() {
        let state = state(u64::MAX);
        assert!(!state.needs_refresh_at(issued_at() + Duration::seconds(1), 60));
    }

    #[test]
    fn snapshot_json_uses_camel_case() {
        let snapshot = state(3600).snapshot();
        let json: Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(json["accessToken"], "a");
        assert_eq!(json["refreshToken"], "r");
        assert_eq!(json["lastRefresh"], 1_700_000_000_000i64);
        assert_eq!(json["expires"], 3600);
        assert_eq!(json["maxRequestAttempts"], 5);
    }
}
