use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use huddle_core::errors::HuddleError;
use huddle_core::events::{DisconnectReason, ParticipantInfo};
use huddle_core::platform::{CreateRoomOptions, LocalTrack, RoomCreated, RoomEvent};

/// One member's bookkeeping inside a room.
struct Member {
    identity: String,
    tracks: Vec<LocalTrack>,
    sender: mpsc::UnboundedSender<RoomEvent>,
    /// True when the platform acquired the tracks itself; they are stopped
    /// when the member leaves.
    owns_tracks: bool,
}

impl Member {
    fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            identity: self.identity.clone(),
            tracks: self.tracks.iter().map(LocalTrack::info).collect(),
        }
    }

    fn send(&self, event: RoomEvent) {
        // A member that dropped its receiver just stops hearing events.
        let _ = self.sender.send(event);
    }
}

struct Room {
    options: CreateRoomOptions,
    members: Vec<Member>,
}

/// What a successful join hands back to the platform.
pub(crate) struct Joined {
    pub(crate) snapshot: Vec<ParticipantInfo>,
    pub(crate) receiver: mpsc::UnboundedReceiver<RoomEvent>,
    pub(crate) session_cap: Duration,
}

/// In-memory room table shared by the platform and its room handles.
pub(crate) struct RoomRegistry {
    rooms: Mutex<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub(crate) fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn create(
        &self,
        options: CreateRoomOptions,
    ) -> Result<RoomCreated, HuddleError> {
        let mut rooms = self.rooms.lock().await;
        if rooms.contains_key(&options.unique_name) {
            return Err(HuddleError::PlatformUnavailable(format!(
                "room {} already exists",
                options.unique_name
            )));
        }
        let created = RoomCreated {
            sid: format!("RM{}", Uuid::new_v4().simple()),
            unique_name: options.unique_name.clone(),
        };
        rooms.insert(
            options.unique_name.clone(),
            Room {
                options,
                members: Vec::new(),
            },
        );
        Ok(created)
    }

    /// Adds a member. Existing members hear the join first, then one
    /// subscribe per track the joiner brought along.
    pub(crate) async fn join(
        &self,
        room_name: &str,
        identity: &str,
        tracks: Vec<LocalTrack>,
        owns_tracks: bool,
    ) -> Result<Joined, HuddleError> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms
            .get_mut(room_name)
            .ok_or_else(|| HuddleError::PlatformConnect(format!("no such room: {room_name}")))?;
        if room.members.iter().any(|m| m.identity == identity) {
            return Err(HuddleError::PlatformConnect(format!(
                "identity {identity} is already in room {room_name}"
            )));
        }

        let snapshot: Vec<ParticipantInfo> = room.members.iter().map(Member::info).collect();

        let (sender, receiver) = mpsc::unbounded_channel();
        let member = Member {
            identity: identity.to_string(),
            tracks,
            sender,
            owns_tracks,
        };
        for other in &room.members {
            other.send(RoomEvent::ParticipantConnected(ParticipantInfo {
                identity: identity.to_string(),
                tracks: Vec::new(),
            }));
            for track in &member.tracks {
                other.send(RoomEvent::TrackSubscribed {
                    track: track.info(),
                    participant: identity.to_string(),
                });
            }
        }
        room.members.push(member);

        Ok(Joined {
            snapshot,
            receiver,
            session_cap: room.options.max_session_duration,
        })
    }

    /// Removes a member if present. The leaver hears `Disconnected`; the
    /// rest hear one unsubscribe per track, then the departure.
    pub(crate) async fn remove(
        &self,
        room_name: &str,
        identity: &str,
        reason: DisconnectReason,
    ) -> bool {
        let mut rooms = self.rooms.lock().await;
        let Some(room) = rooms.get_mut(room_name) else {
            return false;
        };
        let Some(index) = room.members.iter().position(|m| m.identity == identity) else {
            return false;
        };
        let member = room.members.remove(index);

        if member.owns_tracks {
            for track in &member.tracks {
                track.stop();
            }
        }

        for other in &room.members {
            for track in &member.tracks {
                other.send(RoomEvent::TrackUnsubscribed {
                    track: track.info(),
                    participant: member.identity.clone(),
                });
            }
            other.send(RoomEvent::ParticipantDisconnected(member.info()));
        }
        member.send(RoomEvent::Disconnected { reason });
        true
    }

    /// Publishes a track for a member. Republishing the same sid is a no-op.
    pub(crate) async fn publish(
        &self,
        room_name: &str,
        identity: &str,
        track: LocalTrack,
    ) -> Result<(), HuddleError> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms
            .get_mut(room_name)
            .ok_or_else(|| HuddleError::PlatformConnect(format!("no such room: {room_name}")))?;
        let Some(index) = room.members.iter().position(|m| m.identity == identity) else {
            return Err(HuddleError::PlatformConnect(format!(
                "{identity} is not in room {room_name}"
            )));
        };
        if room.members[index].tracks.iter().any(|t| t.sid == track.sid) {
            return Ok(());
        }

        let info = track.info();
        room.members[index].tracks.push(track);
        for (i, other) in room.members.iter().enumerate() {
            if i != index {
                other.send(RoomEvent::TrackSubscribed {
                    track: info.clone(),
                    participant: identity.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Unpublishes a track. Unknown sids are a no-op.
    pub(crate) async fn unpublish(
        &self,
        room_name: &str,
        identity: &str,
        sid: &str,
    ) -> Result<(), HuddleError> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms
            .get_mut(room_name)
            .ok_or_else(|| HuddleError::PlatformConnect(format!("no such room: {room_name}")))?;
        let Some(index) = room.members.iter().position(|m| m.identity == identity) else {
            return Err(HuddleError::PlatformConnect(format!(
                "{identity} is not in room {room_name}"
            )));
        };
        let Some(track_index) = room.members[index].tracks.iter().position(|t| t.sid == sid)
        else {
            return Ok(());
        };

        let track = room.members[index].tracks.remove(track_index);
        for (i, other) in room.members.iter().enumerate() {
            if i != index {
                other.send(RoomEvent::TrackUnsubscribed {
                    track: track.info(),
                    participant: identity.to_string(),
                });
            }
        }
        Ok(())
    }
}
