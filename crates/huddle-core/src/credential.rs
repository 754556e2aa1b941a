use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::MAX_SESSION_DURATION;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential expired")]
    Expired,
    #[error("invalid credential: {0}")]
    Invalid(String),
    #[error("credential missing {0} grant")]
    MissingGrant(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoGrant {
    pub room: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncGrant {
    pub service_sid: String,
}

/// Capability set embedded in a credential. Serialized under the `grants`
/// claim; the sync grant keeps its `data_sync` wire name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grants {
    pub identity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoGrant>,
    #[serde(rename = "data_sync", skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncGrant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub jti: String,
    /// API key the credential was signed with.
    pub iss: String,
    /// Account the API key belongs to.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub grants: Grants,
}

impl Claims {
    /// Room the video grant authorizes, if the credential carries one.
    pub fn video_room(&self) -> Result<&str, CredentialError> {
        self.grants
            .video
            .as_ref()
            .map(|g| g.room.as_str())
            .ok_or(CredentialError::MissingGrant("video"))
    }

    pub fn identity(&self) -> &str {
        &self.grants.identity
    }
}

/// Builds and signs access credentials the way the platform expects them:
/// HS256, issuer = API key, subject = account, grants nested in the payload.
pub struct CredentialBuilder {
    account_sid: String,
    api_key: String,
    api_secret: String,
    identity: Option<String>,
    video: Option<VideoGrant>,
    sync: Option<SyncGrant>,
    ttl: Duration,
}

impl CredentialBuilder {
    pub fn new(
        account_sid: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            account_sid: account_sid.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            identity: None,
            video: None,
            sync: None,
            ttl: MAX_SESSION_DURATION,
        }
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn video_grant(mut self, room: impl Into<String>) -> Self {
        self.video = Some(VideoGrant { room: room.into() });
        self
    }

    pub fn sync_grant(mut self, service_sid: impl Into<String>) -> Self {
        self.sync = Some(SyncGrant {
            service_sid: service_sid.into(),
        });
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn sign(self) -> Result<String, CredentialError> {
        self.sign_at(Utc::now().timestamp())
    }

    // Deterministic variant so expiry boundaries can be tested without
    // wall-clock dependence.
    pub(crate) fn sign_at(self, now: i64) -> Result<String, CredentialError> {
        let identity = self.identity.ok_or(CredentialError::MissingGrant("identity"))?;
        let claims = Claims {
            jti: format!("{}-{}", self.api_key, now),
            iss: self.api_key,
            sub: self.account_sid,
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
            grants: Grants {
                identity,
                video: self.video,
                sync: self.sync,
            },
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.api_secret.as_bytes()),
        )
        .map_err(|e| CredentialError::Invalid(e.to_string()))
    }
}

/// Verifies signature and expiry, returning the claims on success.
pub fn verify(token: &str, api_secret: &str) -> Result<Claims, CredentialError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(api_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => CredentialError::Expired,
        _ => CredentialError::Invalid(e.to_string()),
    })
}
