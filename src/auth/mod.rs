//! Credential lifecycle: state, refresh protocol and the access gate.

pub mod credentials;
pub mod gate;
pub mod refresh;

pub use credentials::{CredentialSnapshot, CredentialState, TokenResponse};
pub use gate::{AccessGate, TokenLease};
pub use refresh::{Grant, NoopObserver, RefreshObserver, TokenEndpoint, TracingObserver};
