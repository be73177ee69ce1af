//! Access tokens and project discovery
//!
//! Tokens come either from the `GOOGLE_OAUTH_ACCESS_TOKEN` environment
//! variable or from the GCE/GKE metadata server, which is what a workload
//! identity-enabled pod sees.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::error::{IamError, Result};

/// Environment variable holding a pre-issued access token
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Source of OAuth2 bearer tokens for the Google APIs
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A currently valid access token
    async fn access_token(&self) -> Result<String>;
}

/// A fixed token, for local development and tests
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Wrap a pre-issued token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

/// Tokens of the instance's default service account, cached until near expiry
pub struct MetadataTokenSource {
    http: reqwest::Client,
    cached: RwLock<Option<(String, Instant)>>,
}

impl MetadataTokenSource {
    /// Create a token source using `http` to reach the metadata server
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            cached: RwLock::new(None),
        }
    }
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn access_token(&self) -> Result<String> {
        {
            let cached = self.cached.read();
            if let Some((token, expires_at)) = cached.as_ref() {
                if Instant::now() + EXPIRY_MARGIN < *expires_at {
                    return Ok(token.clone());
                }
            }
        }

        let url = format!("{}/instance/service-accounts/default/token", METADATA_BASE);
        let response = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| IamError::auth(format!("metadata token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(IamError::auth(format!(
                "metadata server returned HTTP {}",
                response.status()
            )));
        }

        let token: MetadataToken = response
            .json()
            .await
            .map_err(|e| IamError::auth(format!("invalid metadata token response: {}", e)))?;

        debug!(expires_in = token.expires_in, "refreshed access token");
        let expires_at = Instant::now() + Duration::from_secs(token.expires_in);
        *self.cached.write() = Some((token.access_token.clone(), expires_at));
        Ok(token.access_token)
    }
}

/// Pick the token source for this process
///
/// `GOOGLE_OAUTH_ACCESS_TOKEN` wins when set; otherwise the metadata server is used.
pub fn default_token_source(http: reqwest::Client) -> Arc<dyn TokenSource> {
    match std::env::var(ACCESS_TOKEN_ENV) {
        Ok(token) if !token.is_empty() => Arc::new(StaticTokenSource::new(token)),
        _ => Arc::new(MetadataTokenSource::new(http)),
    }
}

/// Project id of the instance, from the metadata server
pub async fn discover_project(http: &reqwest::Client) -> Result<String> {
    let url = format!("{}/project/project-id", METADATA_BASE);
    let response = http
        .get(&url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| IamError::auth(format!("metadata project request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(IamError::auth(format!(
            "metadata server returned HTTP {} for project id",
            response.status()
        )));
    }

    let project = response.text().await?.trim().to_string();
    if project.is_empty() {
        return Err(IamError::auth("metadata server returned an empty project id"));
    }
    Ok(project)
}
