//! Batch protocol.
//!
//! N logical requests travel in one physical `POST` to the batch endpoint; the single
//! reply is split back into N responses. Correlation is purely positional: item `i` of
//! the reply answers request `i` of the input.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::gate::AccessGate;
use crate::error::{classify, ApiResult, OtherError};
use crate::executor::Executor;
use crate::observability::metrics::get_metrics;
use crate::request::{ApiRequest, ApiResponse};
use crate::transport::Transport;
use crate::utils::constants::JSON_CONTENT_TYPE;

#[derive(Debug, Serialize)]
struct BatchEnvelope {
    requests: Vec<BatchItem>,
}

#[derive(Debug, Serialize)]
struct BatchItem {
    #[serde(with = "http_serde::method")]
    method: Method,
    relative_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct BatchReply {
    responses: Vec<BatchItemReply>,
}

#[derive(Debug, Deserialize)]
struct BatchItemReply {
    status: u16,
    #[serde(default)]
    headers: HashMap<String, Value>,
    #[serde(default)]
    response: Option<Value>,
}

/// Outer physical response plus one logical response per input request, in input order.
#[derive(Debug, Clone)]
pub struct BatchResponse {
    response: ApiResponse,
    responses: Vec<ApiResponse>,
}

/// Items of a batch that were rate limited, ready to be batched again.
#[derive(Debug, Clone)]
pub struct RateLimited {
    pub requests: Vec<Arc<ApiRequest>>,
    /// largest `Retry-After` among the rate limited items
    pub retry_after: Option<Duration>,
}

impl BatchResponse {
    /// The physical response of the batch call itself.
    pub fn response(&self) -> &ApiResponse {
        &self.response
    }

    pub fn responses(&self) -> &[ApiResponse] {
        &self.responses
    }

    pub fn into_responses(self) -> Vec<ApiResponse> {
        self.responses
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn rate_limited(&self) -> Option<RateLimited> {
        let limited: Vec<&ApiResponse> = self
            .responses
            .iter()
            .filter(|r| r.status() == StatusCode::TOO_MANY_REQUESTS)
            .collect();
        if limited.is_empty() {
            return None;
        }
        Some(RateLimited {
            requests: limited.iter().map(|r| Arc::clone(r.request())).collect(),
            retry_after: limited.iter().filter_map(|r| r.retry_after()).max(),
        })
    }
}

pub struct BatchExecutor<'a, T: Transport> {
    executor: &'a Executor<T>,
    gate: &'a AccessGate,
    base_url: &'a Url,
    batch_url: &'a Url,
}

impl<'a, T: Transport> BatchExecutor<'a, T> {
    pub fn new(
        executor: &'a Executor<T>,
        gate: &'a AccessGate,
        base_url: &'a Url,
        batch_url: &'a Url,
    ) -> Self {
        Self { executor, gate, base_url, batch_url }
    }

    pub async fn execute(&self, requests: Vec<Arc<ApiRequest>>) -> ApiResult<BatchResponse> {
        if requests.is_empty() {
            return Err(OtherError::request("a batch needs at least one request").into());
        }

        let envelope = BatchEnvelope {
            requests: requests
                .iter()
                .map(|request| self.to_item(request))
                .collect::<ApiResult<Vec<_>>>()?,
        };
        let outer = ApiRequest::post(self.batch_url.clone()).json_body(&envelope)?;

        info!(items = requests.len(), url = %self.batch_url, "sending batch");
        let metrics = get_metrics().await;
        metrics.batch_calls.inc();
        metrics.batch_items.inc_by(requests.len() as u64);

        // one lease for the whole batch round trip
        let response = self.executor.execute(self.gate, Arc::new(outer)).await?;
        if !response.is_success() {
            warn!(status = %response.status(), "batch call failed");
            return Err(classify(response.status(), response.body()));
        }

        let reply: BatchReply = response.json()?;
        if reply.responses.len() != requests.len() {
            return Err(OtherError::decode(format!(
                "batch returned {} responses for {} requests",
                reply.responses.len(),
                requests.len()
            ))
            .with_status(response.status())
            .with_body(response.body())
            .into());
        }

        let responses = reply
            .responses
            .into_iter()
            .zip(requests)
            .map(|(item, request)| demux_item(item, request, &response))
            .collect::<ApiResult<Vec<_>>>()?;
        debug!(items = responses.len(), "batch demultiplexed");

        Ok(BatchResponse { response, responses })
    }

    fn to_item(&self, request: &ApiRequest) -> ApiResult<BatchItem> {
        Ok(BatchItem {
            method: request.method().clone(),
            relative_url: relative_url(self.base_url, request.url())?,
            body: request.body().map(body_value),
            headers: flatten_headers(request.headers()),
        })
    }
}

/// Request URL with the client's base URL prefix stripped; always starts with `/`.
pub fn relative_url(base_url: &Url, url: &Url) -> ApiResult<String> {
    let base = base_url.as_str().trim_end_matches('/');
    let rest = url.as_str().strip_prefix(base).ok_or_else(|| {
        OtherError::request(format!("'{url}' is outside the api base url '{base}' and cannot be batched"))
    })?;
    if rest.is_empty() || rest.starts_with('/') {
        Ok(format!("/{}", rest.trim_start_matches('/')))
    } else if rest.starts_with('?') {
        Ok(format!("/{rest}"))
    } else {
        // base .../2.0 must not match .../2.01
        Err(OtherError::request(format!("'{url}' is outside the api base url '{base}' and cannot be batched")).into())
    }
}

fn body_value(body: &Bytes) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        flat.entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_owned());
    }
    flat
}

fn demux_item(item: BatchItemReply, request: Arc<ApiRequest>, outer: &ApiResponse) -> ApiResult<ApiResponse> {
    let status = StatusCode::from_u16(item.status).map_err(|e| {
        OtherError::decode(format!("batch item has invalid status {}", item.status))
            .with_body(outer.body())
            .with_source(e)
    })?;

    let mut headers = HeaderMap::new();
    for (name, value) in &item.headers {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(header = %name, "skipping batch item header that is not valid http"),
        }
    }

    let body = match &item.response {
        Some(value) => {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            }
            Bytes::from(serde_json::to_vec(value).map_err(|e| {
                OtherError::decode("batch item body cannot be re-encoded").with_source(e)
            })?)
        }
        None => Bytes::new(),
    };

    Ok(ApiResponse::new(status, headers, body, outer.round_trip(), request))
}
