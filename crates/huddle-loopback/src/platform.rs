use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use huddle_core::credential;
use huddle_core::errors::HuddleError;
use huddle_core::events::{DisconnectReason, ParticipantInfo, TrackKind};
use huddle_core::platform::{
    ConnectOptions, CreateRoomOptions, LocalTrack, MAX_SESSION_DURATION, Platform, RoomCreated,
    RoomEvent, RoomHandle, RoomService,
};

use crate::room::RoomRegistry;

/// Settings for the stand-in platform.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Secret every presented credential must be signed with.
    pub api_secret: String,
    /// Upper bound on any membership, whatever the room asks for.
    pub max_session_duration: Duration,
}

impl LoopbackConfig {
    pub fn new(api_secret: impl Into<String>) -> Self {
        Self {
            api_secret: api_secret.into(),
            max_session_duration: MAX_SESSION_DURATION,
        }
    }
}

/// In-process stand-in for the video platform: verifies credentials and
/// keeps membership and track state per room. No media flows anywhere.
pub struct LoopbackPlatform {
    config: LoopbackConfig,
    rooms: Arc<RoomRegistry>,
    deny_media: AtomicBool,
}

impl LoopbackPlatform {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RoomRegistry::new()),
            deny_media: AtomicBool::new(false),
        }
    }

    /// Scripting hook: makes media acquisition fail, like a user denying
    /// camera access.
    pub fn deny_media_access(&self, deny: bool) {
        self.deny_media.store(deny, Ordering::SeqCst);
    }

    fn media_track(kind: TrackKind) -> LocalTrack {
        LocalTrack::new(format!("MT{}", Uuid::new_v4().simple()), kind)
    }
}

#[async_trait]
impl RoomService for LoopbackPlatform {
    async fn create_room(&self, options: CreateRoomOptions) -> Result<RoomCreated, HuddleError> {
        let created = self.rooms.create(options).await?;
        tracing::info!("loopback room {} ({}) created", created.unique_name, created.sid);
        Ok(created)
    }
}

#[async_trait]
impl Platform for LoopbackPlatform {
    async fn create_local_tracks(&self) -> Result<Vec<LocalTrack>, HuddleError> {
        if self.deny_media.load(Ordering::SeqCst) {
            return Err(HuddleError::MediaAcquisition(
                "media access denied".to_string(),
            ));
        }
        Ok(vec![
            Self::media_track(TrackKind::Audio),
            Self::media_track(TrackKind::Video),
        ])
    }

    async fn connect(
        &self,
        token: &str,
        options: ConnectOptions,
    ) -> Result<(Arc<dyn RoomHandle>, mpsc::UnboundedReceiver<RoomEvent>), HuddleError> {
        let claims = credential::verify(token, &self.config.api_secret)
            .map_err(|e| HuddleError::PlatformConnect(format!("credential rejected: {e}")))?;
        let granted_room = claims
            .video_room()
            .map_err(|e| HuddleError::PlatformConnect(format!("credential rejected: {e}")))?;
        if granted_room != options.room_name {
            return Err(HuddleError::PlatformConnect(format!(
                "credential not valid for room {}",
                options.room_name
            )));
        }
        let identity = claims.identity().to_string();

        let owns_tracks = options.tracks.is_empty();
        let tracks = if owns_tracks {
            self.create_local_tracks().await?
        } else {
            options.tracks.clone()
        };

        let joined = self
            .rooms
            .join(&options.room_name, &identity, tracks.clone(), owns_tracks)
            .await?;
        tracing::info!("{} connected to room {}", identity, options.room_name);

        // Membership is bounded by the shorter of the room's configured cap
        // and the platform-wide one. Firing after the member already left is
        // a no-op.
        let cap = joined.session_cap.min(self.config.max_session_duration);
        let rooms = Arc::clone(&self.rooms);
        let room_name = options.room_name.clone();
        let capped = identity.clone();
        tokio::spawn(async move {
            tokio::time::sleep(cap).await;
            if rooms
                .remove(&room_name, &capped, DisconnectReason::DurationLimitReached)
                .await
            {
                tracing::info!("{capped} hit the session duration limit in {room_name}");
            }
        });

        let handle = Arc::new(LoopbackRoomHandle {
            rooms: Arc::clone(&self.rooms),
            room_name: options.room_name,
            identity,
            tracks,
            remotes: joined.snapshot,
        });
        Ok((handle, joined.receiver))
    }
}

/// Live membership returned by connect.
struct LoopbackRoomHandle {
    rooms: Arc<RoomRegistry>,
    room_name: String,
    identity: String,
    tracks: Vec<LocalTrack>,
    remotes: Vec<ParticipantInfo>,
}

#[async_trait]
impl RoomHandle for LoopbackRoomHandle {
    fn name(&self) -> String {
        self.room_name.clone()
    }

    fn local_identity(&self) -> String {
        self.identity.clone()
    }

    fn local_tracks(&self) -> Vec<LocalTrack> {
        self.tracks.clone()
    }

    fn remote_participants(&self) -> Vec<ParticipantInfo> {
        self.remotes.clone()
    }

    async fn publish_track(&self, track: LocalTrack) -> Result<(), HuddleError> {
        self.rooms
            .publish(&self.room_name, &self.identity, track)
            .await
    }

    async fn unpublish_track(&self, sid: &str) -> Result<(), HuddleError> {
        self.rooms
            .unpublish(&self.room_name, &self.identity, sid)
            .await
    }

    async fn disconnect(&self) {
        if self
            .rooms
            .remove(
                &self.room_name,
                &self.identity,
                DisconnectReason::ClientInitiated,
            )
            .await
        {
            tracing::info!("{} disconnected from room {}", self.identity, self.room_name);
        }
    }
}
