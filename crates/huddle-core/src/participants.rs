use crate::events::{ParticipantInfo, TrackInfo};

/// Manages the list of remote participants in a room.
///
/// Updated by the session event pump. Read by UI layers.
#[derive(Debug, Clone)]
pub struct ParticipantManager {
    participants: Vec<ParticipantInfo>,
    local_identity: Option<String>,
}

impl ParticipantManager {
    pub fn new() -> Self {
        Self {
            participants: Vec::new(),
            local_identity: None,
        }
    }

    pub fn set_local_identity(&mut self, identity: String) {
        self.local_identity = Some(identity);
    }

    pub fn local_identity(&self) -> Option<&str> {
        self.local_identity.as_deref()
    }

    pub fn add_participant(&mut self, info: ParticipantInfo) {
        if !self.participants.iter().any(|p| p.identity == info.identity) {
            self.participants.push(info);
        }
    }

    pub fn remove_participant(&mut self, identity: &str) {
        self.participants.retain(|p| p.identity != identity);
    }

    /// Records a subscribed track. Inserts the participant when the
    /// subscription lands before the membership event.
    pub fn add_track(&mut self, identity: &str, track: TrackInfo) {
        match self.participant_mut(identity) {
            Some(p) => {
                if !p.tracks.iter().any(|t| t.sid == track.sid) {
                    p.tracks.push(track);
                }
            }
            None => self.participants.push(ParticipantInfo {
                identity: identity.to_string(),
                tracks: vec![track],
            }),
        }
    }

    pub fn remove_track(&mut self, identity: &str, sid: &str) {
        if let Some(p) = self.participant_mut(identity) {
            p.tracks.retain(|t| t.sid != sid);
        }
    }

    pub fn participants(&self) -> &[ParticipantInfo] {
        &self.participants
    }

    pub fn participant(&self, identity: &str) -> Option<&ParticipantInfo> {
        self.participants.iter().find(|p| p.identity == identity)
    }

    pub fn participant_mut(&mut self, identity: &str) -> Option<&mut ParticipantInfo> {
        self.participants.iter_mut().find(|p| p.identity == identity)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.local_identity = None;
    }
}

impl Default for ParticipantManager {
    fn default() -> Self {
        Self::new()
    }
}
