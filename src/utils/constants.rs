//! Shared constants and invariants

/// Seconds subtracted from a token's validity window before it counts as stale.
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 60;
pub const DEFAULT_MAX_REQUEST_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_REDIRECTS: u32 = 3;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_POOL_IDLE_TIMEOUT_MS: u64 = 90_000;
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 10;

pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub const TOKEN_PATH: &str = "/oauth2/token";
pub const BATCH_PATH: &str = "/batch";

// Headers
pub const AS_USER_HEADER: &str = "as-user";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

// Grant types
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
