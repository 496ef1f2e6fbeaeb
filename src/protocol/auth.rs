//! Two-phase authentication
//!
//! Credentials are exchanged out-of-band for an opaque session token, which
//! the correlator then presents over the stream. Authenticators are tried
//! in order; running out of them is fatal.

use crate::config::{AuthConfig, SESSION_TOKEN_ENV};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Credentials or token refused
    #[error("Authentication rejected: {0}")]
    Rejected(String),
    /// Credential exchange transport failure
    #[error("Credential exchange failed: {0}")]
    Http(#[from] reqwest::Error),
    /// No credential source configured
    #[error("No authentication method configured")]
    NotConfigured,
    /// Every authenticator failed
    #[error("All authentication methods failed: {}", .0.join("; "))]
    Exhausted(Vec<String>),
}

/// Opaque session token
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

/// Source of session tokens
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &str;
    /// Obtain a fresh session token
    async fn token(&self) -> Result<SessionToken, AuthError>;
}

/// Pre-issued token
pub struct StaticToken {
    token: SessionToken,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SessionToken::new(token),
        }
    }
}

#[async_trait]
impl Authenticator for StaticToken {
    fn name(&self) -> &str {
        "static-token"
    }

    async fn token(&self) -> Result<SessionToken, AuthError> {
        Ok(self.token.clone())
    }
}

/// Identifier/password exchange against an HTTP login endpoint
pub struct HttpCredentials {
    client: Client,
    login_url: String,
    identifier: String,
    password: String,
}

impl HttpCredentials {
    pub fn new(
        login_url: impl Into<String>,
        identifier: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            login_url: login_url.into(),
            identifier: identifier.into(),
            password: password.into(),
        })
    }
}

/// Pull the token out of a login response, whatever it is called this week
fn extract_token(body: &Value) -> Option<String> {
    ["ssid", "token"]
        .iter()
        .find_map(|field| body.get(field).and_then(Value::as_str))
        .or_else(|| body.pointer("/data/ssid").and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl Authenticator for HttpCredentials {
    fn name(&self) -> &str {
        "http-credentials"
    }

    async fn token(&self) -> Result<SessionToken, AuthError> {
        tracing::debug!(url = %self.login_url, "Exchanging credentials for session token");

        let response = self
            .client
            .post(&self.login_url)
            .json(&serde_json::json!({
                "identifier": self.identifier,
                "password": self.password,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected(format!("login returned {}", status)));
        }

        let body: Value = response.json().await?;
        extract_token(&body)
            .map(SessionToken::new)
            .ok_or_else(|| AuthError::Rejected("login response carried no token".to_string()))
    }
}

/// Ordered authentication fallbacks
pub struct AuthChain {
    authenticators: Vec<Box<dyn Authenticator>>,
}

impl AuthChain {
    pub fn new(authenticators: Vec<Box<dyn Authenticator>>) -> Self {
        Self { authenticators }
    }

    /// Build from config: a configured or environment token first, then
    /// the credential exchange.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let mut authenticators: Vec<Box<dyn Authenticator>> = Vec::new();

        let token = config
            .token
            .clone()
            .or_else(|| std::env::var(SESSION_TOKEN_ENV).ok());
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            authenticators.push(Box::new(StaticToken::new(token)));
        }

        if let (Some(url), Some(id), Some(pw)) =
            (&config.login_url, &config.identifier, &config.password)
        {
            authenticators.push(Box::new(HttpCredentials::new(url, id, pw)?));
        }

        if authenticators.is_empty() {
            return Err(AuthError::NotConfigured);
        }
        Ok(Self::new(authenticators))
    }

    pub fn authenticators(&self) -> &[Box<dyn Authenticator>] {
        &self.authenticators
    }

    pub fn len(&self) -> usize {
        self.authenticators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Failing;

    #[async_trait]
    impl Authenticator for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn token(&self) -> Result<SessionToken, AuthError> {
            Err(AuthError::Rejected("nope".to_string()))
        }
    }

    #[tokio::test]
    async fn test_static_token() {
        let auth = StaticToken::new("abc");
        assert_eq!(auth.token().await.unwrap().as_str(), "abc");
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = SessionToken::new("secret");
        assert_eq!(format!("{:?}", token), "SessionToken(***)");
    }

    #[test]
    fn test_extract_token_variants() {
        assert_eq!(extract_token(&json!({"ssid": "a"})).as_deref(), Some("a"));
        assert_eq!(extract_token(&json!({"token": "b"})).as_deref(), Some("b"));
        assert_eq!(extract_token(&json!({"data": {"ssid": "c"}})).as_deref(), Some("c"));
        assert!(extract_token(&json!({"code": "ok"})).is_none());
    }

    #[test]
    fn test_chain_from_config() {
        let config = AuthConfig {
            token: Some("tok".to_string()),
            login_url: Some("http://127.0.0.1:1/login".to_string()),
            identifier: Some("me".to_string()),
            password: Some("pw".to_string()),
        };
        let chain = AuthChain::from_config(&config).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.authenticators()[0].name(), "static-token");
        assert_eq!(chain.authenticators()[1].name(), "http-credentials");
    }

    #[tokio::test]
    async fn test_chain_order_is_preserved() {
        let chain = AuthChain::new(vec![Box::new(Failing), Box::new(StaticToken::new("x"))]);
        let first = chain.authenticators()[0].token().await;
        assert!(first.is_err());
        let second = chain.authenticators()[1].token().await.unwrap();
        assert_eq!(second.as_str(), "x");
    }

    #[test]
    fn test_exhausted_display() {
        let err = AuthError::Exhausted(vec!["a: bad".to_string(), "b: worse".to_string()]);
        assert_eq!(
            err.to_string(),
            "All authentication methods failed: a: bad; b: worse"
        );
    }
}
