//! Bearer token acquisition for the open platform.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::debug;

use docimport_shared::{ImportError, Result};

const TENANT_TOKEN_PATH: &str = "/open-apis/auth/v3/tenant_access_token/internal";

/// Tokens are refreshed this long before the platform says they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Supplies the bearer token for every API call.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String>;
}

/// A pre-issued token, used as is.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AuthProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Tenant access token
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TenantTokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    #[serde(default = "default_expire")]
    expire: u64,
}

fn default_expire() -> u64 {
    7200
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Fetches a tenant access token from app credentials and caches it until
/// shortly before expiry.
#[derive(Debug)]
pub struct TenantTokenProvider {
    client: Client,
    endpoint: String,
    app_id: String,
    app_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TenantTokenProvider {
    pub fn new(client: Client, base_url: &str, app_id: &str, app_secret: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}{TENANT_TOKEN_PATH}", base_url.trim_end_matches('/')),
            app_id: app_id.to_string(),
            app_secret: app_secret.to_string(),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<(String, Duration)> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "app_id": self.app_id, "app_secret": self.app_secret }))
            .send()
            .await
            .map_err(|e| ImportError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImportError::Network(format!("{}: HTTP {status}", self.endpoint)));
        }

        let payload: TenantTokenResponse = response
            .json()
            .await
            .map_err(|e| ImportError::parse(format!("invalid tenant token response: {e}")))?;

        if payload.code != 0 {
            return Err(ImportError::api(TENANT_TOKEN_PATH, payload.code, payload.msg));
        }
        if payload.tenant_access_token.is_empty() {
            return Err(ImportError::validation("tenant token response missing tenant_access_token"));
        }
        Ok((payload.tenant_access_token, Duration::from_secs(payload.expire)))
    }
}

#[async_trait]
impl AuthProvider for TenantTokenProvider {
    async fn bearer_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if Instant::now() < entry.refresh_at {
                return Ok(entry.token.clone());
            }
        }

        let (token, ttl) = self.fetch().await?;
        debug!(ttl_secs = ttl.as_secs(), "tenant token refreshed");
        *cached = Some(CachedToken {
            token: token.clone(),
            refresh_at: Instant::now() + ttl.saturating_sub(REFRESH_MARGIN),
        });
        Ok(token)
    }
}
