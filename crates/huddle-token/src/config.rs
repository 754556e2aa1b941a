use std::collections::HashMap;
use std::env;

use rand::Rng;
use rand::distributions::Alphanumeric;
use thiserror::Error;

/// Port the token service listens on when `PORT` is not set.
pub const DEFAULT_PORT: u16 = 8000;

/// Credential lifetime when `HUDDLE_TOKEN_TTL` is not set. Matches the
/// platform's four-hour session bound.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 14_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Token service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Account the API key belongs to.
    pub account_sid: String,
    /// API key credentials that sign issued tokens.
    pub api_key: String,
    pub api_secret: String,
    /// Sync service to grant access to, when one is configured.
    pub sync_service_sid: Option<String>,
    pub port: u16,
    pub token_ttl_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a map (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let account_sid = vars
            .get("HUDDLE_ACCOUNT_SID")
            .ok_or_else(|| ConfigError::MissingEnvVar("HUDDLE_ACCOUNT_SID".to_string()))?
            .clone();

        let api_key = vars
            .get("HUDDLE_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("HUDDLE_API_KEY".to_string()))?
            .clone();

        let api_secret = vars
            .get("HUDDLE_API_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("HUDDLE_API_SECRET".to_string()))?
            .clone();

        let sync_service_sid = vars.get("HUDDLE_SYNC_SERVICE_SID").cloned();

        let port = match vars.get("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                var: "PORT".to_string(),
                message: format!("not a port number: {raw}"),
            })?,
            None => DEFAULT_PORT,
        };

        let token_ttl_secs = match vars.get("HUDDLE_TOKEN_TTL") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                var: "HUDDLE_TOKEN_TTL".to_string(),
                message: format!("not a duration in seconds: {raw}"),
            })?,
            None => DEFAULT_TOKEN_TTL_SECS,
        };

        Ok(Self {
            account_sid,
            api_key,
            api_secret,
            sync_service_sid,
            port,
            token_ttl_secs,
        })
    }

    /// Throwaway credentials for local runs against the loopback platform.
    pub fn dev() -> Self {
        let api_secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        Self {
            account_sid: "ACdev".to_string(),
            api_key: "SKdev".to_string(),
            api_secret,
            sync_service_sid: None,
            port: DEFAULT_PORT,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}
