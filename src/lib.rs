//! # Cloud storage API client core
//!
//! Turns logical API calls into authenticated physical exchanges: keeps the OAuth
//! credential fresh, serializes use of the shared token, retries transient failures with
//! backoff, and multiplexes many requests into one batch call.
//!
//! Modules:
//! - `auth`: credential state, refresh protocol, access gate
//! - `executor`: single request execution, redirects
//! - `resilience`: retry/backoff policy
//! - `batch`: batch serialization and demultiplexing
//! - `transport`: physical exchange seam and the shared connection pool
//! - `error`: status / other error classification
//! - `config`: settings parsing and validation

pub mod auth;
pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod helpers;
pub mod observability;
pub mod request;
pub mod resilience;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;

pub use crate::auth::{CredentialSnapshot, RefreshObserver, TokenLease, TracingObserver};
pub use crate::batch::{BatchResponse, RateLimited};
pub use crate::client::{ApiClient, Credentials};
pub use crate::config::loader::parse_settings;
pub use crate::config::settings::ClientSettings;
pub use crate::error::{ApiError, ApiResult, OtherError, OtherKind, StatusError};
pub use crate::request::{ApiRequest, ApiResponse};
pub use crate::transport::{HttpTransport, Transport};
