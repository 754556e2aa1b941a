use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::HuddleError;

/// Response from the token service: a signed credential plus the name of
/// the room it is good for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub name: String,
}

/// Where the session gets its credentials from. `TokenClient` is the HTTP
/// implementation; tests substitute their own.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<TokenResponse, HuddleError>;
}

/// Fetches access credentials from the token service.
pub struct TokenClient {
    base_url: String,
    http: reqwest::Client,
}

impl TokenClient {
    /// `base_url` is the token service root, like `http://127.0.0.1:8000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    fn token_endpoint(&self) -> String {
        format!("{}/token", self.base_url)
    }
}

#[async_trait]
impl TokenSource for TokenClient {
    /// Call the token service for a credential and the room to join.
    async fn fetch(&self) -> Result<TokenResponse, HuddleError> {
        let url = self.token_endpoint();
        tracing::info!("requesting token from {}", url);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| HuddleError::TokenFetch(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(HuddleError::TokenFetch(format!(
                "token service returned status {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| HuddleError::TokenFetch(format!("invalid token response: {e}")))
    }
}
