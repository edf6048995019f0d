use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use rand::Rng;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::auth::Token;
use crate::config::LarkConfig;
use crate::error::{ApiError, StoryMapError};

/// Error message signature Lark uses for unknown column names.
const FIELD_NOT_FOUND: &str = "FieldNameNotFound";

/// Backoff schedule for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// # Errors
    ///
    /// Returns `StoryMapError::Config` when a delay does not fit in a
    /// `Duration`.
    pub fn from_config(config: &LarkConfig) -> Result<Self, StoryMapError> {
        Ok(Self {
            max_retries: config.max_retries,
            base_delay: seconds("retry-base-delay", config.retry_base_delay)?,
            max_delay: seconds("retry-max-delay", config.retry_max_delay)?,
        })
    }

    /// `base * 2^attempt` plus 10–30% jitter, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        let jitter = delay * rand::thread_rng().gen_range(0.1..=0.3);
        let capped = (delay + jitter).min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// A server-suggested delay wins over the computed backoff.
    pub fn delay_for(&self, attempt: u32, error: &ApiError) -> Duration {
        match error.retry_after() {
            Some(suggested) => suggested.min(self.max_delay),
            None => self.backoff(attempt),
        }
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration, StoryMapError> {
    Duration::try_from_secs_f64(value.max(0.0))
        .map_err(|e| StoryMapError::Config(format!("{name} {value} is out of range: {e}")))
}

/// Everything a single call needs besides method and URL.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pub query: Vec<(String, String)>,
    pub bearer: Option<Token>,
    pub body: Option<Value>,
}

/// A successful call: the envelope's `data` payload and how long it took.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub data: Value,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestMetrics {
    pub total: u64,
    pub failed: u64,
    /// Rolling average latency in seconds
    pub avg_latency: f64,
}

impl RequestMetrics {
    fn observe(&mut self, latency: Duration, success: bool) {
        self.total += 1;
        if !success {
            self.failed += 1;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.total as f64;
        self.avg_latency += (latency.as_secs_f64() - self.avg_latency) / n;
    }
}

#[derive(Deserialize)]
struct Envelope {
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Issues HTTP requests, classifies the result and retries transient failures.
pub struct RequestExecutor {
    client: Client,
    policy: RetryPolicy,
    metrics: Mutex<RequestMetrics>,
}

impl RequestExecutor {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            metrics: Mutex::new(RequestMetrics::default()),
        }
    }

    pub fn metrics(&self) -> RequestMetrics {
        self.metrics
            .lock()
            .map(|metrics| *metrics)
            .unwrap_or_default()
    }

    /// Execute a request with automatic retry on network errors, rate limits
    /// and server faults. Authentication, field and unknown errors return on
    /// the first attempt.
    pub async fn execute(
        &self,
        method: Method,
        url: Url,
        params: &RequestParams,
    ) -> Result<Outcome, ApiError> {
        debug!("Lark API request: {method} {url} query={:?}", params.query);

        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let result = self.send_once(method.clone(), url.clone(), params).await;
            let elapsed = started.elapsed();
            self.observe(elapsed, result.is_ok());

            let err = match result {
                Ok(data) => {
                    debug!("Lark API request succeeded: {method} {url} in {elapsed:?}");
                    return Ok(Outcome { data, elapsed });
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                error!("Lark API request failed without retry: {err}");
                return Err(err);
            }

            if attempt >= self.policy.max_retries {
                error!(
                    "Lark API request failed after {} retries: {err}",
                    self.policy.max_retries
                );
                return Err(ApiError::Network(format!(
                    "{method} {url} failed after {} retries: {err}",
                    self.policy.max_retries
                )));
            }

            let delay = self.policy.delay_for(attempt, &err);
            warn!(
                "{err}, retrying in {:.2}s ({}/{})...",
                delay.as_secs_f64(),
                attempt + 1,
                self.policy.max_retries
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: Url,
        params: &RequestParams,
    ) -> Result<Value, ApiError> {
        let mut request = self.client.request(method, url);
        if !params.query.is_empty() {
            request = request.query(&params.query);
        }
        if let Some(token) = &params.bearer {
            request = request.bearer_auth(token.as_str());
        }
        if let Some(body) = &params.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        classify_response(response).await
    }

    fn observe(&self, latency: Duration, success: bool) {
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.observe(latency, success);
        }
    }
}

async fn classify_response(response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Authentication("HTTP 401 Unauthorized".to_string()));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_retry_after(value, Utc::now()));
        return Err(ApiError::RateLimit {
            message: "HTTP 429 Too Many Requests".to_string(),
            retry_after,
        });
    }

    if status.is_server_error() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        return Err(ApiError::Server {
            status: status.as_u16(),
            message,
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| ApiError::Network(format!("Failed to read response body: {e}")))?;

    if status != StatusCode::OK {
        return Err(ApiError::Unknown(format!("HTTP {status}: {body}")));
    }

    parse_envelope(&body)
}

/// `Retry-After` is either delta-seconds or an HTTP date. A date in the past
/// means retry now.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    match DateTime::parse_from_rfc2822(value) {
        Ok(at) => Some(
            (at.with_timezone(&Utc) - now)
                .to_std()
                .unwrap_or(Duration::ZERO),
        ),
        Err(e) => {
            debug!("Ignoring unparseable Retry-After header {value:?}: {e}");
            None
        }
    }
}

/// Unwraps the `code`/`msg`/`data` envelope every Lark endpoint returns.
pub(crate) fn parse_envelope(body: &str) -> Result<Value, ApiError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| ApiError::Unknown(format!("Invalid JSON response: {e}")))?;

    match envelope.code {
        Some(0) => Ok(envelope
            .data
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))),
        code => {
            let msg = envelope.msg.unwrap_or_else(|| "Unknown error".to_string());
            let code = code.map_or_else(|| "missing".to_string(), |c| c.to_string());
            if msg.contains(FIELD_NOT_FOUND) {
                Err(ApiError::Field(format!("code {code}: {msg}")))
            } else {
                Err(ApiError::Unknown(format!("code {code}: {msg}")))
            }
        }
    }
}
