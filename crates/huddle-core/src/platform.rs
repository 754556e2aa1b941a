use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::HuddleError;
use crate::events::{DisconnectReason, ParticipantInfo, TrackInfo, TrackKind};

/// Longest the platform lets a participant stay in a room (four hours).
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(14_400);

/// A locally acquired media track. Clones share the stop latch so a track
/// handed to both the preview pane and the room is stopped exactly once.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    pub sid: String,
    pub kind: TrackKind,
    stopped: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(sid: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            sid: sid.into(),
            kind,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops capture. Returns true only for the call that performed the stop.
    pub fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            sid: self.sid.clone(),
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Room name the credential was minted for.
    pub room_name: String,
    /// Tracks to publish on join. Empty means the platform acquires its own.
    pub tracks: Vec<LocalTrack>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    Group,
    PeerToPeer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    Vp8,
}

/// Room settings fixed at creation time.
#[derive(Debug, Clone)]
pub struct CreateRoomOptions {
    pub unique_name: String,
    pub kind: RoomKind,
    pub record_on_connect: bool,
    pub status_callback: Option<String>,
    pub video_codecs: Vec<VideoCodec>,
    pub max_session_duration: Duration,
}

#[derive(Debug, Clone)]
pub struct RoomCreated {
    pub sid: String,
    pub unique_name: String,
}

/// Events a room delivers to a member over its connect receiver.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    ParticipantConnected(ParticipantInfo),
    ParticipantDisconnected(ParticipantInfo),
    TrackSubscribed { track: TrackInfo, participant: String },
    TrackUnsubscribed { track: TrackInfo, participant: String },
    Disconnected { reason: DisconnectReason },
}

/// A live membership in a room.
#[async_trait]
pub trait RoomHandle: Send + Sync {
    fn name(&self) -> String;
    fn local_identity(&self) -> String;
    /// Tracks published for the local participant (preview tracks if they
    /// were passed to connect, otherwise whatever the platform acquired).
    fn local_tracks(&self) -> Vec<LocalTrack>;
    /// Remote members present when this handle was created. Later joins and
    /// leaves arrive as events.
    fn remote_participants(&self) -> Vec<ParticipantInfo>;
    async fn publish_track(&self, track: LocalTrack) -> Result<(), HuddleError>;
    async fn unpublish_track(&self, sid: &str) -> Result<(), HuddleError>;
    /// Leaves the room. Idempotent.
    async fn disconnect(&self);
}

/// Client-side surface of the video platform.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn create_local_tracks(&self) -> Result<Vec<LocalTrack>, HuddleError>;
    async fn connect(
        &self,
        token: &str,
        options: ConnectOptions,
    ) -> Result<(Arc<dyn RoomHandle>, mpsc::UnboundedReceiver<RoomEvent>), HuddleError>;
}

/// Administrative surface used by the token service at startup.
#[async_trait]
pub trait RoomService: Send + Sync {
    async fn create_room(&self, options: CreateRoomOptions) -> Result<RoomCreated, HuddleError>;
}
