use crate::events::{TrackInfo, TrackKind};

/// Who a rendered element belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOwner {
    Local,
    Remote(String), // participant identity
}

/// One rendered media element per attached track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewElement {
    pub track_sid: String,
    pub kind: TrackKind,
    pub owner: TrackOwner,
}

/// Stand-in for a media container in the page.
///
/// Attach and detach are set operations keyed on track sid: attaching a
/// track that is already rendered changes nothing, detaching an absent
/// one is a no-op.
#[derive(Debug, Clone, Default)]
pub struct MediaContainer {
    elements: Vec<ViewElement>,
}

impl MediaContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders a track. Returns false when the track was already attached.
    pub fn attach(&mut self, track: &TrackInfo, owner: TrackOwner) -> bool {
        if self.elements.iter().any(|e| e.track_sid == track.sid) {
            return false;
        }
        self.elements.push(ViewElement {
            track_sid: track.sid.clone(),
            kind: track.kind,
            owner,
        });
        true
    }

    /// Removes the element for `sid`, returning it if it was rendered.
    pub fn detach(&mut self, sid: &str) -> Option<ViewElement> {
        let index = self.elements.iter().position(|e| e.track_sid == sid)?;
        Some(self.elements.remove(index))
    }

    /// Removes every element belonging to `owner`, returning them.
    pub fn detach_owner(&mut self, owner: &TrackOwner) -> Vec<ViewElement> {
        let (removed, kept) = self
            .elements
            .drain(..)
            .partition(|e| &e.owner == owner);
        self.elements = kept;
        removed
    }

    /// Whether any element of this kind is rendered. The preview flow uses
    /// this the way the page checks for an existing `<video>` element.
    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.elements.iter().any(|e| e.kind == kind)
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.elements.iter().any(|e| e.track_sid == sid)
    }

    pub fn elements(&self) -> &[ViewElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }
}

/// The two containers of the demo page: local preview and remote media.
#[derive(Debug, Clone, Default)]
pub struct View {
    pub local: MediaContainer,
    pub remote: MediaContainer,
}

impl View {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element_count(&self) -> usize {
        self.local.len() + self.remote.len()
    }

    pub fn clear(&mut self) {
        self.local.clear();
        self.remote.clear();
    }
}
