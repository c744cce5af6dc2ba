//! Bearer tokens for the Google APIs
//!
//! `AuthorizedUserToken` reads the authorized-user file written by the
//! installed-app consent flow (`token.json`) and refreshes the access token
//! through the OAuth token endpoint. The consent flow itself is not run here.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::model::parse_timestamp;

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the recorded expiry.
const EXPIRY_LEEWAY_SECS: i64 = 60;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenError {
    /// Credential file missing or unreadable
    #[error("credentials unavailable: {0}")]
    Unavailable(String),

    /// The token endpoint refused the refresh token
    #[error("token refresh rejected: {0}")]
    Rejected(String),

    /// Token endpoint unreachable or failing
    #[error("token refresh failed: {0}")]
    Transient(String),
}

impl TokenError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TokenError::Transient(_))
    }
}

/// Source of bearer tokens for API calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, TokenError>;
}

/// A fixed token, for tests and short-lived runs.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, TokenError> {
        Ok(self.0.clone())
    }
}

/// Contents of an authorized-user credential file.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUserFile {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expiry: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => expiry - chrono::Duration::seconds(EXPIRY_LEEWAY_SECS) > now,
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Refreshing token source backed by an authorized-user file.
pub struct AuthorizedUserToken {
    client: Client,
    credentials: AuthorizedUserFile,
    cached: Mutex<Option<CachedToken>>,
}

impl AuthorizedUserToken {
    pub fn new(credentials: AuthorizedUserFile) -> Self {
        let cached = credentials.token.clone().map(|value| CachedToken {
            value,
            expires_at: credentials.expiry.as_deref().and_then(parse_timestamp),
        });
        Self {
            client: Client::new(),
            credentials,
            cached: Mutex::new(cached),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, TokenError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TokenError::Unavailable(format!("reading {}: {}", path.display(), e))
        })?;
        let credentials: AuthorizedUserFile = serde_json::from_str(&content).map_err(|e| {
            TokenError::Unavailable(format!("parsing {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "Loaded authorized-user credentials");
        Ok(Self::new(credentials))
    }

    /// Point refreshes at another token endpoint.
    pub fn with_token_uri(mut self, uri: impl Into<String>) -> Self {
        self.credentials.token_uri = uri.into();
        self
    }

    async fn refresh(&self) -> Result<CachedToken, TokenError> {
        debug!(token_uri = %self.credentials.token_uri, "Refreshing access token");

        let response = self
            .client
            .post(&self.credentials.token_uri)
            .form(&[
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", self.credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| TokenError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                400 | 401 | 403 => TokenError::Rejected(format!("HTTP {}: {}", status, body)),
                _ => TokenError::Transient(format!("HTTP {}: {}", status, body)),
            });
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Transient(format!("invalid token response: {}", e)))?;

        Ok(CachedToken {
            value: refreshed.access_token,
            expires_at: refreshed
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }
}

#[async_trait]
impl TokenSource for AuthorizedUserToken {
    async fn access_token(&self) -> Result<String, TokenError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        let token = self.refresh().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials(token: Option<&str>, expiry: Option<&str>) -> AuthorizedUserFile {
        AuthorizedUserFile {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "refresh-me".to_string(),
            token: token.map(str::to_string),
            expiry: expiry.map(str::to_string),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unexpired_token_is_reused() {
        let source = AuthorizedUserToken::new(credentials(Some("cached"), Some("2999-01-01T00:00:00Z")));
        assert_eq!(source.access_token().await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = AuthorizedUserToken::new(credentials(Some("stale"), Some("2001-01-01T00:00:00Z")))
            .with_token_uri(format!("{}/token", server.uri()));

        assert_eq!(source.access_token().await.unwrap(), "fresh");
        assert_eq!(source.access_token().await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_revoked_refresh_token_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        let source = AuthorizedUserToken::new(credentials(None, None))
            .with_token_uri(format!("{}/token", server.uri()));

        let err = source.access_token().await.unwrap_err();
        assert!(matches!(err, TokenError::Rejected(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_token_endpoint_outage_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = AuthorizedUserToken::new(credentials(None, None))
            .with_token_uri(format!("{}/token", server.uri()));

        assert!(!source.access_token().await.unwrap_err().is_fatal());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"token":"abc","refresh_token":"r","client_id":"c","client_secret":"s","scopes":["x"],"expiry":"2030-01-01T00:00:00.000000Z"}}"#
        )
        .unwrap();

        let source = AuthorizedUserToken::from_file(file.path()).unwrap();
        assert_eq!(source.credentials.token_uri, DEFAULT_TOKEN_URI);
        assert_eq!(source.credentials.token.as_deref(), Some("abc"));

        let missing = AuthorizedUserToken::from_file(Path::new("/nonexistent/token.json"));
        assert!(matches!(missing, Err(TokenError::Unavailable(_))));
    }
}
