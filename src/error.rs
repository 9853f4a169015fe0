//! Error classification.
//!
//! Every failure the engine reports is one of two kinds: a [`StatusError`] built from a
//! structured API error body, or an [`OtherError`] wrapping whatever else went wrong
//! (transport, decoding, authentication). Callers branch on the variant.

use std::error::Error as StdError;
use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error(transparent)]
    Other(#[from] OtherError),
}

impl ApiError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status(e) => Some(e.status),
            ApiError::Other(e) => e.status,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Other(e) if e.kind == OtherKind::Auth)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Other(e) if e.kind == OtherKind::Transport)
    }

    /// Raw response body preserved for diagnostics.
    pub fn raw_body(&self) -> Option<&str> {
        match self {
            ApiError::Status(e) => e.raw_body.as_deref(),
            ApiError::Other(e) => e.body.as_deref(),
        }
    }
}

/// Structured error payload returned by the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub context_info: Option<Value>,
    #[serde(default)]
    pub help_url: Option<String>,
}

impl ErrorBody {
    /// Parse `body` as a structured error. Anything that is not a JSON object with at
    /// least a `code` or a `message` (and, when present, `type == "error"`) is rejected.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let parsed: ErrorBody = serde_json::from_slice(body).ok()?;
        let typed_as_error = parsed.error_type.as_deref().map_or(true, |t| t == "error");
        if typed_as_error && (parsed.code.is_some() || parsed.message.is_some()) {
            Some(parsed)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{status}: {}", .body.describe())]
pub struct StatusError {
    pub status: StatusCode,
    pub body: ErrorBody,
    pub raw_body: Option<String>,
}

impl StatusError {
    pub fn message(&self) -> Option<&str> {
        self.body.message.as_deref()
    }

    pub fn code(&self) -> Option<&str> {
        self.body.code.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.body.request_id.as_deref()
    }
}

impl ErrorBody {
    fn describe(&self) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => format!("{code} - {message}"),
            (Some(code), None) => code.to_owned(),
            (None, Some(message)) => message.to_owned(),
            (None, None) => "unknown error".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtherKind {
    /// No usable credential (missing refresh token, not yet authenticated).
    Auth,
    /// The physical exchange could not be completed.
    Transport,
    /// A body was not what the protocol promised.
    Decode,
    /// The caller handed in a request the engine cannot send.
    Request,
}

impl fmt::Display for OtherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OtherKind::Auth => "auth",
            OtherKind::Transport => "transport",
            OtherKind::Decode => "decode",
            OtherKind::Request => "request",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{kind} error: {message}")]
pub struct OtherError {
    pub kind: OtherKind,
    pub message: String,
    pub status: Option<StatusCode>,
    pub body: Option<String>,
    #[source]
    pub source: Option<BoxError>,
}

impl OtherError {
    pub fn new(kind: OtherKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            body: None,
            source: None,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(OtherKind::Auth, message)
    }

    pub fn request(message: impl Into<String>) -> Self {
        Self::new(OtherKind::Request, message)
    }

    pub fn transport(message: impl Into<String>, cause: anyhow::Error) -> Self {
        Self::new(OtherKind::Transport, message).with_source(cause)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(OtherKind::Decode, message)
    }

    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        self.source = Some(cause.into());
        self
    }

    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.body = Some(String::from_utf8_lossy(body).into_owned());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }
}

/// Turn a non-success exchange into an error value.
pub fn classify(status: StatusCode, body: &[u8]) -> ApiError {
    match ErrorBody::parse(body) {
        Some(parsed) => ApiError::Status(StatusError {
            status,
            body: parsed,
            raw_body: Some(String::from_utf8_lossy(body).into_owned()),
        }),
        None => ApiError::Other(
            OtherError::decode(format!("unexpected response with status {status}"))
                .with_status(status)
                .with_body(body),
        ),
    }
}
