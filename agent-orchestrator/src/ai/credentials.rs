//! OAuth credentials for the Gemini backend.
//!
//! The token file is a Google "authorized user" JSON document. The access
//! token is cached in memory and refreshed through the token endpoint when it
//! is missing or about to expire.

use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::sync::Mutex;

pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the recorded expiry
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUserFile {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(exp) => exp - ChronoDuration::seconds(EXPIRY_SKEW_SECS) > now,
            None => true,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

pub struct TokenProvider {
    client: Client,
    token_path: PathBuf,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(client: Client, token_path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            token_path: token_path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Return a usable access token, refreshing it when needed
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.access_token.clone());
        }

        let file = self.read_token_file().await?;
        let from_file = file.token.clone().map(|access_token| CachedToken {
            access_token,
            expires_at: file.expiry,
        });

        let token = match from_file {
            Some(token) if token.is_fresh(Utc::now()) => token,
            _ => self.refresh(&file).await?,
        };

        *cached = Some(token.clone());
        Ok(token.access_token)
    }

    /// Drop the cached token so the next call re-reads or refreshes
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn read_token_file(&self) -> Result<AuthorizedUserFile> {
        if !tokio::fs::try_exists(&self.token_path).await.unwrap_or(false) {
            return Err(OrchestratorError::AuthFailure(format!(
                "Token file not found at {}. Please generate it via OAuth and place it in the credentials folder.",
                self.token_path.display()
            )));
        }

        let content = tokio::fs::read_to_string(&self.token_path).await.map_err(|e| {
            OrchestratorError::AuthFailure(format!(
                "Failed to read token file {}: {}",
                self.token_path.display(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            OrchestratorError::AuthFailure(format!(
                "Malformed token file {}: {}",
                self.token_path.display(),
                e
            ))
        })
    }

    async fn refresh(&self, file: &AuthorizedUserFile) -> Result<CachedToken> {
        let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            file.refresh_token.as_deref(),
            file.client_id.as_deref(),
            file.client_secret.as_deref(),
        ) else {
            return Err(OrchestratorError::AuthFailure(
                "Access token expired and token file lacks refresh credentials".to_string(),
            ));
        };

        let endpoint = file.token_uri.as_deref().unwrap_or(TOKEN_ENDPOINT);
        log::info!("[GEMINI] Refreshing access token via {}", endpoint);

        let response = self
            .client
            .post(endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::AuthFailure(format!(
                "Token refresh failed: {} - {}",
                status, text
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            OrchestratorError::AuthFailure(format!("Failed to parse token response: {}", e))
        })?;

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        })
    }
}
