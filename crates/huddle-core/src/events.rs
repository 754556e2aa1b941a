use std::sync::Arc;

use crate::view::ViewElement;

/// Events emitted by the session controller to UI listeners.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    PreviewStarted { tracks: Vec<TrackInfo> },
    MediaFailed { message: String },
    Joined { room: String, identity: String },
    ConnectFailed { message: String },
    ParticipantJoined(ParticipantInfo),
    ParticipantLeft(String), // participant identity
    TrackAttached(ViewElement),
    TrackDetached(ViewElement),
    Left { reason: DisconnectReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Previewing,
    Connecting,
    Joined,
    Leaving,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub identity: String,
    pub tracks: Vec<TrackInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub sid: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Why a joined session ended. The platform enforces a maximum session
/// duration; hitting it arrives as an ordinary disconnect with
/// `DurationLimitReached`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientInitiated,
    DurationLimitReached,
    RoomClosed,
}

/// Trait for receiving events from the session controller.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone)]
pub struct EventEmitter {
    listeners: Arc<std::sync::RwLock<Vec<Arc<dyn SessionEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(std::sync::RwLock::new(Vec::new())),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
