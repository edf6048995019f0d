use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;

use crate::auth::Token;
use crate::config::LarkConfig;
use crate::error::{ApiError, StoryMapError};

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 7200;

/// A tenant access token and the instant it must be replaced.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: Token,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    tenant_access_token: Option<String>,
    #[serde(default)]
    expire: Option<i64>,
}

/// Owns the client's single tenant access token.
///
/// The credential lives behind one async mutex that is held for the whole
/// check-and-refresh, so concurrent callers wait for an in-flight refresh
/// instead of starting their own.
pub struct CredentialManager {
    client: Client,
    auth_url: Url,
    app_id: String,
    app_secret: Token,
    attempts: u32,
    backoff_base: Duration,
    refresh_buffer: chrono::Duration,
    credential: Mutex<Option<Credential>>,
    refreshes: AtomicU64,
}

impl CredentialManager {
    pub fn new(
        client: Client,
        auth_url: Url,
        app_id: String,
        app_secret: Token,
        config: &LarkConfig,
    ) -> Result<Self, StoryMapError> {
        let backoff_base = Duration::try_from_secs_f64(config.auth_retry_base_delay.max(0.0))
            .map_err(|e| {
                StoryMapError::Config(format!(
                    "auth-retry-base-delay {} is out of range: {e}",
                    config.auth_retry_base_delay
                ))
            })?;
        let refresh_buffer = chrono::Duration::try_seconds(config.token_refresh_buffer)
            .ok_or_else(|| {
                StoryMapError::Config(format!(
                    "token-refresh-buffer {} is out of range",
                    config.token_refresh_buffer
                ))
            })?;

        Ok(Self {
            client,
            auth_url,
            app_id,
            app_secret,
            attempts: config.auth_retries.max(1),
            backoff_base,
            refresh_buffer,
            credential: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        })
    }

    /// Returns a usable credential, refreshing it first when absent or stale.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Authentication` once every refresh attempt has
    /// failed. Callers surface this rather than retrying.
    pub async fn valid_credential(&self) -> Result<Credential, ApiError> {
        let mut guard = self.credential.lock().await;

        if let Some(credential) = guard.as_ref().filter(|c| c.is_fresh(Utc::now())) {
            return Ok(credential.clone());
        }

        debug!("Access token missing or about to expire, refreshing");
        match self.refresh_with_retry().await {
            Some(credential) => {
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                info!("Access token refreshed, valid until {}", credential.expires_at);
                *guard = Some(credential.clone());
                Ok(credential)
            }
            None => {
                error!("Unable to obtain a valid access token");
                Err(ApiError::Authentication(format!(
                    "token refresh failed after {} attempts",
                    self.attempts
                )))
            }
        }
    }

    /// Forgets the cached credential if it is still the one the server
    /// rejected. Returns false when another caller already replaced it, so a
    /// burst of 401s on the same token leads to a single refresh.
    pub async fn invalidate(&self, rejected: &Token) -> bool {
        let mut guard = self.credential.lock().await;
        if guard.as_ref().is_some_and(|c| &c.token == rejected) {
            warn!("Access token rejected by server, discarding it");
            *guard = None;
            true
        } else {
            false
        }
    }

    /// Delay slept after the given failed attempt: `base * 2^attempt`.
    pub fn refresh_backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Non-blocking check used for metrics; false while a refresh holds the lock.
    pub fn has_valid_credential(&self) -> bool {
        self.credential
            .try_lock()
            .map(|guard| guard.as_ref().is_some_and(|c| c.is_fresh(Utc::now())))
            .unwrap_or(false)
    }

    async fn refresh_with_retry(&self) -> Option<Credential> {
        for attempt in 0..self.attempts {
            debug!("Requesting access token (attempt {}/{})", attempt + 1, self.attempts);

            match self.request_token().await {
                Ok(credential) => return Some(credential),
                Err(err) => warn!(
                    "Access token refresh failed (attempt {}/{}): {err}",
                    attempt + 1,
                    self.attempts
                ),
            }

            if attempt + 1 < self.attempts {
                tokio::time::sleep(self.refresh_backoff(attempt)).await;
            }
        }

        None
    }

    async fn request_token(&self) -> Result<Credential, ApiError> {
        let payload = json!({
            "app_id": self.app_id,
            "app_secret": self.app_secret.as_str(),
        });

        let response = self
            .client
            .post(self.auth_url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Network(format!("HTTP {status}: {text}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Authentication(format!("Invalid token response: {e}")))?;

        if body.code != Some(0) {
            return Err(ApiError::Authentication(
                body.msg.unwrap_or_else(|| "Unknown auth error".to_string()),
            ));
        }

        let token = body
            .tenant_access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Authentication("Response has no access token".to_string()))?;

        let expire = body.expire.unwrap_or(DEFAULT_TOKEN_TTL_SECONDS);
        let expires_at = chrono::Duration::try_seconds(expire)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .and_then(|at| at.checked_sub_signed(self.refresh_buffer))
            .ok_or_else(|| ApiError::Authentication(format!("Token expiry {expire}s is out of range")))?;

        Ok(Credential {
            token: Token::from(token),
            expires_at,
        })
    }
}
