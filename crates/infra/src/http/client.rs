use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response, StatusCode};
use rxflow_common::resilience::CallError;
use rxflow_domain::RxflowError;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::InfraError;

/// Longest body excerpt carried in a status error message
const MAX_ERROR_BODY: usize = 256;

/// Single-attempt HTTP client whose failures are [`CallError`]s
///
/// Retries, rate limiting and circuit breaking belong to the
/// `ResilientTransport` wrapping each call; this client never retries.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: ReqwestClient,
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self, RxflowError> {
        Self::builder().build()
    }

    /// Create a request builder using the underlying reqwest client.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Send `builder` once; non-2xx statuses become [`CallError::Status`]
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, CallError> {
        let request = builder.build().map_err(|err| CallError::Fatal(err.to_string()))?;
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "sending HTTP request");

        let response = self.client.execute(request).await.map_err(map_send_error)?;
        let status = response.status();
        debug!(%method, %url, %status, "received HTTP response");

        if status.is_success() {
            return Ok(response);
        }
        Err(status_error(response).await)
    }

    /// GET `url` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CallError> {
        let response = self.send(self.request(Method::GET, url)).await?;
        response.json::<T>().await.map_err(|err| {
            if err.is_timeout() {
                CallError::Timeout(format!("reading response body timed out: {err}"))
            } else {
                CallError::Fatal(format!("invalid JSON response: {err}"))
            }
        })
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
    default_headers: Option<HeaderMap>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: None,
            user_agent: Some(concat!("rxflow/", env!("CARGO_PKG_VERSION")).to_string()),
            default_headers: None,
        }
    }
}

impl HttpClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    pub fn build(self) -> Result<HttpClient, RxflowError> {
        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();

        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder.build().map_err(|err| {
            let infra: InfraError = err.into();
            RxflowError::from(infra)
        })?;

        Ok(HttpClient { client })
    }
}

fn map_send_error(err: reqwest::Error) -> CallError {
    if err.is_timeout() {
        CallError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        CallError::Connection(err.to_string())
    } else if err.is_builder() {
        CallError::Fatal(err.to_string())
    } else {
        CallError::Connection(err.to_string())
    }
}

async fn status_error(response: Response) -> CallError {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers(), Utc::now());
    let body = response.text().await.unwrap_or_default();
    CallError::Status { code: status.as_u16(), retry_after, message: status_message(status, &body) }
}

fn status_message(status: StatusCode, body: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("unknown status");
    let body = body.trim();
    if body.is_empty() {
        return format!("HTTP {} {reason}", status.as_u16());
    }
    let excerpt: String = body.chars().take(MAX_ERROR_BODY).collect();
    format!("HTTP {} {reason}: {excerpt}", status.as_u16())
}

/// Read `Retry-After` as delta-seconds or an HTTP date relative to `now`
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
