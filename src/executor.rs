use std::sync::Arc;

use http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION, USER_AGENT};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tracing::{debug, error, warn};
use url::Url;

use crate::auth::gate::AccessGate;
use crate::error::{ApiResult, OtherError};
use crate::helpers::time::get_instant;
use crate::observability::metrics::get_metrics;
use crate::request::{ApiRequest, ApiResponse};
use crate::resilience::retry::RetrySettings;
use crate::transport::{PhysicalRequest, Transport};
use crate::utils::constants::JSON_CONTENT_TYPE;

/// Turns a logical [`ApiRequest`] into physical exchanges over a [`Transport`].
#[derive(Debug)]
pub struct Executor<T: Transport> {
    transport: T,
    retry: RetrySettings,
    user_agent: HeaderValue,
    max_redirects: u32,
}

impl<T: Transport> Executor<T> {
    pub fn new(
        transport: T,
        retry: RetrySettings,
        user_agent: &str,
        max_redirects: u32,
    ) -> ApiResult<Self> {
        let user_agent = HeaderValue::from_str(user_agent).map_err(|e| {
            OtherError::request(format!("user agent '{user_agent}' is not a valid header value"))
                .with_source(e)
        })?;
        Ok(Self { transport, retry, user_agent, max_redirects })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Execute one request. Authenticated requests hold a token lease for the whole
    /// round trip, retries and redirects included.
    pub async fn execute(&self, gate: &AccessGate, request: Arc<ApiRequest>) -> ApiResult<ApiResponse> {
        if !request.should_authenticate() {
            let attempts = gate.max_request_attempts().await;
            return self.send(&request, None, attempts).await;
        }

        let lease = gate.acquire(self).await?;
        let result = self.send(&request, Some(lease.token()), lease.max_attempts()).await;
        lease.release();
        result
    }

    /// One logical exchange with an already-granted token (or none).
    pub(crate) async fn send(
        &self,
        request: &Arc<ApiRequest>,
        token: Option<&str>,
        attempts: u32,
    ) -> ApiResult<ApiResponse> {
        let started = get_instant();
        let retry = self.retry.with_attempts(attempts);

        let mut method = request.method().clone();
        let mut url = request.url().clone();
        let mut body = request.body().cloned();
        let mut token = token;
        let mut redirects_left = request.redirect_budget().unwrap_or(self.max_redirects);

        loop {
            let headers = self.build_headers(request.headers(), &method, token, body.is_some())?;

            let outcome = retry
                .run_with_retry(|| {
                    self.transport.send(PhysicalRequest {
                        method: method.clone(),
                        url: url.clone(),
                        headers: headers.clone(),
                        body: body.clone(),
                    })
                })
                .await;

            let physical = match outcome {
                Ok(physical) => physical,
                Err(err) => {
                    get_metrics().await.transport_failures.inc();
                    error!(%method, %url, error = %err, "exchange failed");
                    return Err(OtherError::transport(format!("{method} {url} failed"), err).into());
                }
            };

            if let Some(next) = redirect_target(physical.status, &physical.headers, &url) {
                if redirects_left > 0 {
                    redirects_left -= 1;
                    if next.origin() != url.origin() {
                        // never forward the bearer token to another host
                        token = None;
                    }
                    if switches_to_get(physical.status, &method) {
                        method = Method::GET;
                        body = None;
                    }
                    debug!(status = %physical.status, from = %url, to = %next, redirects_left, "following redirect");
                    url = next;
                    continue;
                }
                warn!(status = %physical.status, %url, "redirect budget exhausted, returning redirect response");
            }

            let round_trip = started.elapsed();
            let metrics = get_metrics().await;
            metrics
                .http_requests
                .with_label_values(&[request.method().as_str(), physical.status.as_str()])
                .inc();
            metrics
                .http_request_duration
                .with_label_values(&[request.method().as_str()])
                .observe(round_trip.as_secs_f64());
            debug!(status = %physical.status, ?round_trip, "exchange complete");

            return Ok(ApiResponse::from_physical(physical, round_trip, Arc::clone(request)));
        }
    }

    fn build_headers(
        &self,
        base: &HeaderMap,
        method: &Method,
        token: Option<&str>,
        has_body: bool,
    ) -> ApiResult<HeaderMap> {
        let mut headers = base.clone();
        headers.insert(USER_AGENT, self.user_agent.clone());

        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                OtherError::auth("access token is not a valid header value").with_source(e)
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        if !has_body && *method == Method::GET {
            headers.remove(CONTENT_TYPE);
        } else if defaults_to_json(method) && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }
        Ok(headers)
    }
}

fn defaults_to_json(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::OPTIONS
}

fn redirect_target(status: StatusCode, headers: &HeaderMap, current: &Url) -> Option<Url> {
    let followable = matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    );
    if !followable {
        return None;
    }
    let location = headers.get(LOCATION)?.to_str().ok()?;
    current.join(location).ok()
}

/// 303 always, and 301/302 for anything but GET/HEAD, continue as a bodiless GET.
fn switches_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::SEE_OTHER => true,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => {
            *method != Method::GET && *method != Method::HEAD
        }
        _ => false,
    }
}
