use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::Mutex;

use huddle_core::auth::TokenResponse;
use huddle_core::credential::CredentialBuilder;
use huddle_core::platform::{CreateRoomOptions, RoomCreated, RoomKind, RoomService, VideoCodec};

use crate::config::Config;
use crate::errors::ServiceError;
use crate::names;

/// Where the platform would post room status callbacks.
const STATUS_CALLBACK_URL: &str = "http://example.org";

/// Mints access tokens bound to the room created at startup.
///
/// Every caller of the service joins that one shared room; a fresh
/// server-chosen identity is minted per request.
pub struct TokenService {
    config: Config,
    room: RoomCreated,
    issued: Mutex<HashSet<String>>,
}

impl TokenService {
    /// Creates the shared room and returns a service bound to it.
    ///
    /// Room creation failure is fatal: the caller logs it and never starts
    /// serving, so no token is ever issued for a room that does not exist.
    pub async fn provision(rooms: &dyn RoomService, config: Config) -> Result<Self, ServiceError> {
        let options = CreateRoomOptions {
            unique_name: names::room_name(),
            kind: RoomKind::Group,
            record_on_connect: true,
            status_callback: Some(STATUS_CALLBACK_URL.to_string()),
            video_codecs: vec![VideoCodec::H264],
            max_session_duration: Duration::from_secs(config.token_ttl_secs),
        };
        let room = rooms.create_room(options).await?;
        tracing::info!("created room {} ({})", room.unique_name, room.sid);

        Ok(Self {
            config,
            room,
            issued: Mutex::new(HashSet::new()),
        })
    }

    /// Name of the room every issued token is bound to.
    pub fn room_name(&self) -> &str {
        &self.room.unique_name
    }

    /// Mints a token for a fresh server-chosen identity.
    pub async fn issue(&self) -> Result<TokenResponse, ServiceError> {
        let identity = self.fresh_identity().await;

        let mut builder = CredentialBuilder::new(
            self.config.account_sid.as_str(),
            self.config.api_key.as_str(),
            self.config.api_secret.as_str(),
        )
        .identity(identity.as_str())
        .video_grant(self.room.unique_name.as_str())
        .ttl(Duration::from_secs(self.config.token_ttl_secs));
        if let Some(sid) = &self.config.sync_service_sid {
            builder = builder.sync_grant(sid.as_str());
        }
        let token = builder.sign()?;

        tracing::info!("issued token for {} in room {}", identity, self.room.unique_name);
        Ok(TokenResponse {
            token,
            name: self.room.unique_name.clone(),
        })
    }

    /// Picks a display name this process has not handed out before.
    async fn fresh_identity(&self) -> String {
        let mut issued = self.issued.lock().await;
        let name = unique_with_suffix(&issued, &names::identity());
        issued.insert(name.clone());
        name
    }
}

// Appends a numeric suffix until the name is unused.
fn unique_with_suffix(issued: &HashSet<String>, base: &str) -> String {
    if !issued.contains(base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base} {n}");
        if !issued.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
