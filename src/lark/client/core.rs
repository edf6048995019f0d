use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use log::{info, warn};
use reqwest::{Client, Method};
use url::Url;

use super::executor::{Outcome, RequestExecutor, RequestParams, RetryPolicy};
use crate::auth::Token;
use crate::config::LarkConfig;
use crate::error::{ApiError, Result, StoryMapError};
use crate::lark::auth::CredentialManager;
use crate::lark::rate_limit::RateLimiter;
use crate::lark::types::PerformanceMetrics;

const TOKEN_ENDPOINT: &str = "auth/v3/tenant_access_token/internal";
pub(super) const SERVER_MAX_PAGE_SIZE: usize = 500;

/// Lark Open API client.
///
/// One instance owns the credential, the rate window and the container-id
/// cache for its lifetime; share it behind an `Arc` between concurrent tasks.
pub struct LarkClient {
    pub(super) api_url: Url,
    pub(super) max_page_size: usize,
    pub(super) container_ids: RwLock<HashMap<String, String>>,
    executor: RequestExecutor,
    credentials: CredentialManager,
    rate_limiter: RateLimiter,
    started: Instant,
}

impl LarkClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the configured
    /// base URL is invalid.
    pub fn new(config: &LarkConfig, app_id: String, app_secret: Token) -> Result<Self> {
        if app_id.trim().is_empty() || app_secret.is_empty() {
            return Err(StoryMapError::Config(
                "Lark app id and app secret are required".to_string(),
            ));
        }

        let client = Client::builder()
            .user_agent(concat!("storymap/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| StoryMapError::Config(format!("Failed to create HTTP client: {e}")))?;

        let api_url = api_base(&config.base_url)?;
        let auth_url = api_url
            .join(TOKEN_ENDPOINT)
            .map_err(|e| StoryMapError::Config(format!("Invalid auth URL: {e}")))?;

        let credentials =
            CredentialManager::new(client.clone(), auth_url, app_id, app_secret, config)?;
        let executor = RequestExecutor::new(client, RetryPolicy::from_config(config)?);
        let rate_limiter = RateLimiter::new(config.requests_per_minute, config.rate_limit_enabled);

        info!(
            "Lark client ready: base_url={}, max_page_size={}, timeout={}s, max_retries={}, rate_limit={}/min (enabled: {})",
            api_url,
            config.max_page_size,
            config.timeout,
            config.max_retries,
            config.requests_per_minute,
            config.rate_limit_enabled
        );

        Ok(Self {
            api_url,
            max_page_size: config.max_page_size.clamp(1, SERVER_MAX_PAGE_SIZE),
            container_ids: RwLock::new(HashMap::new()),
            executor,
            credentials,
            rate_limiter,
            started: Instant::now(),
        })
    }

    pub(super) fn endpoint(&self, path: &str) -> std::result::Result<Url, ApiError> {
        self.api_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Unknown(format!("Invalid endpoint {path}: {e}")))
    }

    /// Credential, then rate admission, then the retried request.
    ///
    /// An unavailable credential fails the call without touching the
    /// endpoint. A 401 discards the rejected token and repeats the whole
    /// call once with a fresh one.
    pub(super) async fn authenticated_request(
        &self,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
    ) -> std::result::Result<Outcome, ApiError> {
        let url = self.endpoint(path)?;
        let credential = self.credentials.valid_credential().await?;
        let mut params = RequestParams {
            query,
            bearer: Some(credential.token.clone()),
            body: None,
        };

        self.rate_limiter.admit().await;
        match self.executor.execute(method.clone(), url.clone(), &params).await {
            Err(ApiError::Authentication(reason)) => {
                warn!("{method} {path} was rejected ({reason}), retrying with a new token");
                self.credentials.invalidate(&credential.token).await;
                let fresh = self.credentials.valid_credential().await?;
                params.bearer = Some(fresh.token);

                self.rate_limiter.admit().await;
                self.executor.execute(method, url, &params).await
            }
            result => result,
        }
    }

    pub async fn performance_metrics(&self) -> PerformanceMetrics {
        let requests = self.executor.metrics();
        #[allow(clippy::cast_precision_loss)]
        let success_rate = (requests.total - requests.failed) as f64 / requests.total.max(1) as f64;

        PerformanceMetrics {
            requests_total: requests.total,
            requests_failed: requests.failed,
            avg_response_time: requests.avg_latency,
            success_rate,
            auth_refreshes: self.credentials.refresh_count(),
            auth_token_valid: self.credentials.has_valid_credential(),
            rate_limit_hits: self.rate_limiter.hits(),
            rate_limit_utilization: self.rate_limiter.utilization().await,
            uptime: self.started.elapsed().as_secs_f64(),
        }
    }
}

/// Normalizes the base URL so relative endpoint paths join beneath it.
fn api_base(base_url: &str) -> Result<Url> {
    let mut normalized = base_url.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).map_err(|e| StoryMapError::Config(format!("Invalid base URL: {e}")))
}
