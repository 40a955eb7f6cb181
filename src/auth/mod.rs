//! OAuth token management
//!
//! [`TokenManager`] exchanges a refresh token for a fresh access token. It is used
//! once when a run starts and reactively whenever the API answers 401. Refresh
//! failures are logged and surface as `None`; callers decide what a missing token
//! means for them.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for one token exchange
pub const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Token endpoint failures
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Request never produced a response
    #[error("token request failed: {0}")]
    Network(String),

    /// Endpoint answered with a non-success status
    #[error("token endpoint returned {status}: {body}")]
    Status {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },

    /// Body was not a token document
    #[error("could not decode token response: {0}")]
    Decode(String),

    /// Token document carried no access token
    #[error("token response has no access_token")]
    MissingAccessToken,
}

/// Source of bearer tokens for the fetcher
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Current access token
    fn access_token(&self) -> String;

    /// Obtain and store a new access token; `None` when the refresh failed
    async fn refresh(&self) -> Option<String>;
}

/// OAuth client credentials and the long-lived refresh token
#[derive(Clone)]
pub struct OAuthCredentials {
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Refresh token
    pub refresh_token: String,
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[HIDDEN]")
            .field("refresh_token", &"[HIDDEN]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug)]
struct TokenPair {
    access_token: String,
    refresh_token: String,
}

/// Refresh-token exchange against the OAuth token endpoint
pub struct TokenManager {
    client: Arc<Client>,
    token_url: String,
    client_id: String,
    client_secret: String,
    tokens: RwLock<TokenPair>,
}

impl TokenManager {
    /// Create a manager starting from `access_token` (may be empty until the first refresh)
    pub fn new(
        client: Arc<Client>,
        token_url: impl Into<String>,
        credentials: OAuthCredentials,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            tokens: RwLock::new(TokenPair {
                access_token: access_token.into(),
                refresh_token: credentials.refresh_token,
            }),
        }
    }

    /// Token endpoint URL
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Refresh token the next exchange will present
    pub fn refresh_token(&self) -> String {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh_token
            .clone()
    }

    async fn exchange(&self) -> Result<String, AuthError> {
        let refresh_token = self.refresh_token();
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .header(ACCEPT, "application/json")
            .form(&form)
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::Decode(e.to_string()))?;
        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingAccessToken)?;

        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.access_token = access_token.clone();
        if let Some(rotated) = token.refresh_token.filter(|t| !t.is_empty()) {
            if rotated != tokens.refresh_token {
                debug!("Refresh token rotated");
            }
            tokens.refresh_token = rotated;
        }

        info!(expires_in_secs = token.expires_in, "Access token refreshed");
        Ok(access_token)
    }
}

#[async_trait]
impl TokenRefresher for TokenManager {
    fn access_token(&self) -> String {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token
            .clone()
    }

    async fn refresh(&self) -> Option<String> {
        match self.exchange().await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, token_url = %self.token_url, "Token refresh failed");
                None
            }
        }
    }
}
