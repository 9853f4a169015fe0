//! Logical request and response values.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::form_urlencoded;
use url::Url;

use crate::error::{classify, ApiError, ApiResult, OtherError};
use crate::transport::PhysicalResponse;
use crate::utils::constants::{AS_USER_HEADER, FORM_CONTENT_TYPE, JSON_CONTENT_TYPE};

/// One logical API call.
///
/// The body is buffered at construction, so the same request can be sent on every retry
/// attempt and serialized into a batch without being consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
    should_authenticate: bool,
    max_redirects: Option<u32>,
}

impl ApiRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            should_authenticate: true,
            max_redirects: None,
        }
    }

    /// Like [`ApiRequest::new`] but parses the URL.
    pub fn parse(method: Method, url: &str) -> ApiResult<Self> {
        let url = Url::parse(url).map_err(|e| {
            OtherError::request(format!("invalid request url '{url}'")).with_source(e)
        })?;
        Ok(Self::new(method, url))
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: Url) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: Url) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn options(url: Url) -> Self {
        Self::new(Method::OPTIONS, url)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json_body<T: Serialize + ?Sized>(mut self, value: &T) -> ApiResult<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| OtherError::request("request body is not serializable").with_source(e))?;
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    /// Form-encode `pairs` as the body.
    pub fn form_body<'a>(mut self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        self.body = Some(Bytes::from(body));
        self
    }

    pub fn raw_body(mut self, body: impl Into<Bytes>, content_type: HeaderValue) -> Self {
        self.headers.insert(CONTENT_TYPE, content_type);
        self.body = Some(body.into());
        self
    }

    /// Skip the bearer token for this request.
    pub fn unauthenticated(mut self) -> Self {
        self.should_authenticate = false;
        self
    }

    /// Override the client-wide redirect budget for this request.
    pub fn max_redirects(mut self, max_redirects: u32) -> Self {
        self.max_redirects = Some(max_redirects);
        self
    }

    /// Perform the call on behalf of another user.
    pub fn act_as(&mut self, user_id: &str) -> ApiResult<()> {
        let value = HeaderValue::from_str(user_id).map_err(|e| {
            OtherError::request(format!("user id '{user_id}' is not a valid header value"))
                .with_source(e)
        })?;
        self.headers.insert(HeaderName::from_static(AS_USER_HEADER), value);
        Ok(())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn should_authenticate(&self) -> bool {
        self.should_authenticate
    }

    pub fn redirect_budget(&self) -> Option<u32> {
        self.max_redirects
    }

    pub fn acting_as(&self) -> Option<&str> {
        self.headers.get(AS_USER_HEADER).and_then(|v| v.to_str().ok())
    }
}

/// Result of one logical exchange. The body is always a complete byte buffer.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    content_type: Option<String>,
    round_trip: Duration,
    request: Arc<ApiRequest>,
}

impl ApiResponse {
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        round_trip: Duration,
        request: Arc<ApiRequest>,
    ) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        Self { status, headers, body, content_type, round_trip, request }
    }

    pub(crate) fn from_physical(
        physical: PhysicalResponse,
        round_trip: Duration,
        request: Arc<ApiRequest>,
    ) -> Self {
        Self::new(physical.status, physical.headers, physical.body, round_trip, request)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn round_trip(&self) -> Duration {
        self.round_trip
    }

    /// The request this response answers.
    pub fn request(&self) -> &Arc<ApiRequest> {
        &self.request
    }

    /// Server-directed wait carried by `Retry-After`, in whole seconds.
    pub fn retry_after(&self) -> Option<Duration> {
        retry_after(&self.headers)
    }

    pub fn text(&self) -> ApiResult<String> {
        String::from_utf8(self.body.to_vec()).map_err(|e| {
            ApiError::from(
                OtherError::decode("response body is not valid UTF-8")
                    .with_status(self.status)
                    .with_source(e),
            )
        })
    }

    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ApiError::from(
                OtherError::decode("response body is not the expected JSON")
                    .with_status(self.status)
                    .with_body(&self.body)
                    .with_source(e),
            )
        })
    }

    /// Keep successful responses, classify everything else.
    pub fn error_for_status(self) -> ApiResult<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(classify(self.status, &self.body))
        }
    }
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
