use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::auth::TokenSource;
use crate::errors::HuddleError;
use crate::events::{
    DisconnectReason, EventEmitter, ParticipantInfo, SessionEvent, SessionEventListener,
    SessionState, TrackInfo, TrackKind,
};
use crate::participants::ParticipantManager;
use crate::platform::{ConnectOptions, LocalTrack, Platform, RoomEvent, RoomHandle};
use crate::view::{TrackOwner, View, ViewElement};

/// Drives one participant's session against the video platform: preview,
/// join, room events, leave.
///
/// State machine: Idle -> Previewing -> Connecting -> Joined -> Leaving ->
/// Idle, with preview optional and every error path landing back in Idle.
/// The epoch counter makes joins single-flight: a connect that resolves
/// after the session moved on is discarded instead of resurrecting it.
pub struct Session {
    platform: Arc<dyn Platform>,
    tokens: Arc<dyn TokenSource>,
    state: Arc<Mutex<SessionState>>,
    room: Arc<Mutex<Option<Arc<dyn RoomHandle>>>>,
    preview_tracks: Arc<Mutex<Vec<LocalTrack>>>,
    participants: Arc<Mutex<ParticipantManager>>,
    view: Arc<Mutex<View>>,
    emitter: EventEmitter,
    epoch: Arc<AtomicU64>,
}

impl Session {
    pub fn new(platform: Arc<dyn Platform>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            platform,
            tokens,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            room: Arc::new(Mutex::new(None)),
            preview_tracks: Arc::new(Mutex::new(Vec::new())),
            participants: Arc::new(Mutex::new(ParticipantManager::new())),
            view: Arc::new(Mutex::new(View::new())),
            emitter: EventEmitter::new(),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a listener for session events.
    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.emitter.add_listener(listener);
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// Snapshot of the remote participant roster.
    pub async fn participants(&self) -> Vec<ParticipantInfo> {
        self.participants.lock().await.participants().to_vec()
    }

    pub async fn local_elements(&self) -> Vec<ViewElement> {
        self.view.lock().await.local.elements().to_vec()
    }

    pub async fn remote_elements(&self) -> Vec<ViewElement> {
        self.view.lock().await.remote.elements().to_vec()
    }

    /// Name of the joined room, if any.
    pub async fn active_room(&self) -> Option<String> {
        self.room.lock().await.as_ref().map(|r| r.name())
    }

    /// Acquire local media and render it in the local container.
    ///
    /// Re-entrant: a second call reuses the tracks already acquired and
    /// leaves the rendered preview alone.
    pub async fn preview(&self) -> Result<Vec<TrackInfo>, HuddleError> {
        let state = *self.state.lock().await;
        if !matches!(state, SessionState::Idle | SessionState::Previewing) {
            return Err(HuddleError::InvalidTransition {
                state,
                action: "preview",
            });
        }

        // Reuse tracks from an earlier preview run.
        let existing = self.preview_tracks.lock().await.clone();
        let (tracks, fresh) = if existing.is_empty() {
            let acquired = match self.platform.create_local_tracks().await {
                Ok(tracks) => tracks,
                Err(e) => {
                    tracing::warn!("unable to access local media: {e}");
                    self.emitter.emit(SessionEvent::MediaFailed {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            };
            *self.preview_tracks.lock().await = acquired.clone();
            (acquired, true)
        } else {
            (existing, false)
        };

        // Attach unless a video element is already rendered.
        {
            let mut view = self.view.lock().await;
            if !view.local.has_kind(TrackKind::Video) {
                for track in &tracks {
                    Self::attach_local(&mut view, &self.emitter, &track.info());
                }
            }
        }

        self.set_state(SessionState::Previewing).await;

        let infos: Vec<TrackInfo> = tracks.iter().map(|t| t.info()).collect();
        if fresh {
            self.emitter.emit(SessionEvent::PreviewStarted {
                tracks: infos.clone(),
            });
        }
        Ok(infos)
    }

    /// Fetch a token and connect to the room it names.
    ///
    /// Only one join can be in flight: calling again while Connecting,
    /// Joined or Leaving is rejected. Preview tracks, when present, are
    /// published as-is.
    pub async fn join(&self) -> Result<(), HuddleError> {
        {
            let mut state = self.state.lock().await;
            if !matches!(*state, SessionState::Idle | SessionState::Previewing) {
                return Err(HuddleError::InvalidTransition {
                    state: *state,
                    action: "join",
                });
            }
            *state = SessionState::Connecting;
        }
        self.emitter.emit(SessionEvent::StateChanged(SessionState::Connecting));
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let response = match self.tokens.fetch().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("token fetch failed: {e}");
                self.reset_connecting().await;
                return Err(e);
            }
        };

        let tracks = self.preview_tracks.lock().await.clone();
        let options = ConnectOptions {
            room_name: response.name.clone(),
            tracks,
        };

        let (room, events) = match self.platform.connect(&response.token, options).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("could not connect: {e}");
                self.emitter.emit(SessionEvent::ConnectFailed {
                    message: e.to_string(),
                });
                self.reset_connecting().await;
                return Err(e);
            }
        };

        // Commit only if this join is still the current flight. A close()
        // that raced the connect bumped the epoch; the fresh handle is then
        // released instead of resurrecting the session. Rendering and
        // seeding stay inside the critical section: a leave or close that
        // lands mid-seed waits on the state lock and then tears down
        // everything committed here.
        {
            let mut state = self.state.lock().await;
            let current = self.epoch.load(Ordering::SeqCst) == epoch
                && *state == SessionState::Connecting;
            if !current {
                drop(state);
                room.disconnect().await;
                self.reset_connecting().await;
                return Err(HuddleError::Superseded);
            }
            *state = SessionState::Joined;
            *self.room.lock().await = Some(room.clone());
            self.emitter.emit(SessionEvent::StateChanged(SessionState::Joined));

            let identity = room.local_identity();
            self.participants
                .lock()
                .await
                .set_local_identity(identity.clone());
            tracing::info!("joined room {} as {}", response.name, identity);
            self.emitter.emit(SessionEvent::Joined {
                room: response.name.clone(),
                identity,
            });

            // Render the local participant unless the preview already did.
            {
                let mut view = self.view.lock().await;
                if !view.local.has_kind(TrackKind::Video) {
                    for track in room.local_tracks() {
                        Self::attach_local(&mut view, &self.emitter, &track.info());
                    }
                }
            }

            // Seed participants already in the room.
            for info in room.remote_participants() {
                self.participants.lock().await.add_participant(info.clone());
                self.emitter.emit(SessionEvent::ParticipantJoined(info.clone()));
                let mut view = self.view.lock().await;
                for track in &info.tracks {
                    Self::attach_remote(&mut view, &self.emitter, track, &info.identity);
                }
            }
        }

        // Spawn the event pump
        let epoch_counter = self.epoch.clone();
        let emitter = self.emitter.clone();
        let state = self.state.clone();
        let room_ref = self.room.clone();
        let preview_tracks = self.preview_tracks.clone();
        let participants = self.participants.clone();
        let view = self.view.clone();

        tokio::spawn(async move {
            Self::event_loop(
                events,
                epoch,
                epoch_counter,
                emitter,
                state,
                room_ref,
                preview_tracks,
                participants,
                view,
            )
            .await;
        });

        Ok(())
    }

    /// Leave the joined room and tear the session down.
    pub async fn leave(&self) -> Result<(), HuddleError> {
        {
            let state = self.state.lock().await;
            if *state != SessionState::Joined {
                return Err(HuddleError::InvalidTransition {
                    state: *state,
                    action: "leave",
                });
            }
        }
        self.disconnect_active().await;
        Ok(())
    }

    /// Unload path: supersedes any in-flight join and leaves the room when
    /// joined. Safe to call from any state, repeatedly.
    pub async fn close(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.disconnect_active().await;
    }

    async fn disconnect_active(&self) -> bool {
        {
            let mut state = self.state.lock().await;
            if *state != SessionState::Joined {
                return false;
            }
            *state = SessionState::Leaving;
        }
        self.emitter.emit(SessionEvent::StateChanged(SessionState::Leaving));

        let room = self.room.lock().await.take();
        if let Some(room) = room {
            room.disconnect().await;
        }
        Self::teardown(
            DisconnectReason::ClientInitiated,
            None,
            &self.epoch,
            &self.state,
            &self.room,
            &self.preview_tracks,
            &self.participants,
            &self.view,
            &self.emitter,
        )
        .await;
        true
    }

    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().await;
        if *state != next {
            *state = next;
            self.emitter.emit(SessionEvent::StateChanged(next));
        }
    }

    // A failed or superseded join lands back in Idle. Preview artifacts
    // survive so the user can try again.
    async fn reset_connecting(&self) {
        let mut state = self.state.lock().await;
        if *state == SessionState::Connecting {
            *state = SessionState::Idle;
            self.emitter.emit(SessionEvent::StateChanged(SessionState::Idle));
        }
    }

    fn attach_local(view: &mut View, emitter: &EventEmitter, track: &TrackInfo) {
        if view.local.attach(track, TrackOwner::Local) {
            emitter.emit(SessionEvent::TrackAttached(ViewElement {
                track_sid: track.sid.clone(),
                kind: track.kind,
                owner: TrackOwner::Local,
            }));
        }
    }

    fn attach_remote(view: &mut View, emitter: &EventEmitter, track: &TrackInfo, identity: &str) {
        let owner = TrackOwner::Remote(identity.to_string());
        if view.remote.attach(track, owner.clone()) {
            emitter.emit(SessionEvent::TrackAttached(ViewElement {
                track_sid: track.sid.clone(),
                kind: track.kind,
                owner,
            }));
        }
    }

    // Full teardown: stop preview tracks once, clear both containers and
    // the roster, drop the room, land in Idle. Runs at most once per
    // session; a second caller finds the state already reset and skips.
    // A pump passes the epoch it was spawned under so a stale pump cannot
    // tear down a session that joined after it.
    #[allow(clippy::too_many_arguments)]
    async fn teardown(
        reason: DisconnectReason,
        expected_epoch: Option<u64>,
        epoch: &AtomicU64,
        state: &Mutex<SessionState>,
        room_ref: &Mutex<Option<Arc<dyn RoomHandle>>>,
        preview_tracks: &Mutex<Vec<LocalTrack>>,
        participants: &Mutex<ParticipantManager>,
        view: &Mutex<View>,
        emitter: &EventEmitter,
    ) {
        let mut state = state.lock().await;
        if expected_epoch.is_some_and(|e| epoch.load(Ordering::SeqCst) != e) {
            return;
        }
        if !matches!(*state, SessionState::Joined | SessionState::Leaving) {
            return;
        }
        *state = SessionState::Idle;
        epoch.fetch_add(1, Ordering::SeqCst);

        // The clears stay under the state lock: a rejoin cannot commit
        // until the old session's artifacts are gone.
        let tracks = std::mem::take(&mut *preview_tracks.lock().await);
        for track in &tracks {
            if track.stop() {
                tracing::info!("stopped local track {}", track.sid);
            }
        }

        participants.lock().await.clear();
        view.lock().await.clear();
        *room_ref.lock().await = None;

        emitter.emit(SessionEvent::Left { reason });
        emitter.emit(SessionEvent::StateChanged(SessionState::Idle));
    }

    #[allow(clippy::too_many_arguments)]
    async fn event_loop(
        mut events: mpsc::UnboundedReceiver<RoomEvent>,
        epoch: u64,
        epoch_counter: Arc<AtomicU64>,
        emitter: EventEmitter,
        state: Arc<Mutex<SessionState>>,
        room_ref: Arc<Mutex<Option<Arc<dyn RoomHandle>>>>,
        preview_tracks: Arc<Mutex<Vec<LocalTrack>>>,
        participants: Arc<Mutex<ParticipantManager>>,
        view: Arc<Mutex<View>>,
    ) {
        while let Some(event) = events.recv().await {
            // The session moved on (left, closed, rejoined); this pump is
            // stale and must not touch anything. The check repeats under
            // the locks below because a teardown can land between recv and
            // the mutation; teardown bumps the epoch before clearing, so a
            // check that still passes under the lock means the clears have
            // not run yet and will wipe whatever this arm writes.
            if epoch_counter.load(Ordering::SeqCst) != epoch {
                break;
            }

            match event {
                RoomEvent::ParticipantConnected(info) => {
                    tracing::info!("participant joined: {}", info.identity);
                    let mut roster = participants.lock().await;
                    if epoch_counter.load(Ordering::SeqCst) != epoch {
                        break;
                    }
                    roster.add_participant(info.clone());
                    // Tracks are rendered on TrackSubscribed, not here.
                    emitter.emit(SessionEvent::ParticipantJoined(info));
                }

                RoomEvent::TrackSubscribed { track, participant } => {
                    let mut roster = participants.lock().await;
                    let mut view = view.lock().await;
                    if epoch_counter.load(Ordering::SeqCst) != epoch {
                        break;
                    }
                    roster.add_track(&participant, track.clone());
                    Self::attach_remote(&mut view, &emitter, &track, &participant);
                }

                RoomEvent::TrackUnsubscribed { track, participant } => {
                    let mut roster = participants.lock().await;
                    let mut view = view.lock().await;
                    if epoch_counter.load(Ordering::SeqCst) != epoch {
                        break;
                    }
                    roster.remove_track(&participant, &track.sid);
                    if let Some(element) = view.remote.detach(&track.sid) {
                        emitter.emit(SessionEvent::TrackDetached(element));
                    }
                }

                RoomEvent::ParticipantDisconnected(info) => {
                    tracing::info!("participant left: {}", info.identity);
                    let mut roster = participants.lock().await;
                    let mut view = view.lock().await;
                    if epoch_counter.load(Ordering::SeqCst) != epoch {
                        break;
                    }
                    roster.remove_participant(&info.identity);
                    let removed = view
                        .remote
                        .detach_owner(&TrackOwner::Remote(info.identity.clone()));
                    for element in removed {
                        emitter.emit(SessionEvent::TrackDetached(element));
                    }
                    emitter.emit(SessionEvent::ParticipantLeft(info.identity));
                }

                RoomEvent::Disconnected { reason } => {
                    tracing::info!("room disconnected: {reason:?}");
                    Self::teardown(
                        reason,
                        Some(epoch),
                        &epoch_counter,
                        &state,
                        &room_ref,
                        &preview_tracks,
                        &participants,
                        &view,
                        &emitter,
                    )
                    .await;
                    break;
                }
            }
        }

        tracing::info!("session event pump ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::sync::mpsc::UnboundedSender;

    struct StubTokens {
        fail: AtomicBool,
    }

    impl StubTokens {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl TokenSource for StubTokens {
        async fn fetch(&self) -> Result<TokenResponse, HuddleError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(HuddleError::TokenFetch("service down".to_string()));
            }
            Ok(TokenResponse {
                token: "header.claims.sig".to_string(),
                name: "ab1cd".to_string(),
            })
        }
    }

    struct StubRoom {
        name: String,
        tracks: Vec<LocalTrack>,
        remotes: Vec<ParticipantInfo>,
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl RoomHandle for StubRoom {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn local_identity(&self) -> String {
            "alice".to_string()
        }

        fn local_tracks(&self) -> Vec<LocalTrack> {
            self.tracks.clone()
        }

        fn remote_participants(&self) -> Vec<ParticipantInfo> {
            self.remotes.clone()
        }

        async fn publish_track(&self, _track: LocalTrack) -> Result<(), HuddleError> {
            Ok(())
        }

        async fn unpublish_track(&self, _sid: &str) -> Result<(), HuddleError> {
            Ok(())
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct StubPlatform {
        media_denied: AtomicBool,
        connect_fails: AtomicBool,
        acquisitions: AtomicUsize,
        gate: Option<Arc<Notify>>,
        remotes: std::sync::Mutex<Vec<ParticipantInfo>>,
        acquired: std::sync::Mutex<Vec<LocalTrack>>,
        rooms: std::sync::Mutex<Vec<Arc<StubRoom>>>,
        events_tx: std::sync::Mutex<Option<UnboundedSender<RoomEvent>>>,
    }

    impl StubPlatform {
        fn new() -> Arc<Self> {
            Self::build(None)
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Self::build(Some(gate))
        }

        fn build(gate: Option<Arc<Notify>>) -> Arc<Self> {
            Arc::new(Self {
                media_denied: AtomicBool::new(false),
                connect_fails: AtomicBool::new(false),
                acquisitions: AtomicUsize::new(0),
                gate,
                remotes: std::sync::Mutex::new(Vec::new()),
                acquired: std::sync::Mutex::new(Vec::new()),
                rooms: std::sync::Mutex::new(Vec::new()),
                events_tx: std::sync::Mutex::new(None),
            })
        }

        fn seed_remote(&self, identity: &str, tracks: Vec<TrackInfo>) {
            self.remotes.lock().unwrap().push(ParticipantInfo {
                identity: identity.to_string(),
                tracks,
            });
        }

        fn sender(&self) -> UnboundedSender<RoomEvent> {
            self.events_tx.lock().unwrap().clone().unwrap()
        }

        fn last_room(&self) -> Arc<StubRoom> {
            self.rooms.lock().unwrap().last().unwrap().clone()
        }

        fn acquired_tracks(&self) -> Vec<LocalTrack> {
            self.acquired.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Platform for StubPlatform {
        async fn create_local_tracks(&self) -> Result<Vec<LocalTrack>, HuddleError> {
            if self.media_denied.load(Ordering::SeqCst) {
                return Err(HuddleError::MediaAcquisition(
                    "permission denied".to_string(),
                ));
            }
            let n = self.acquisitions.fetch_add(1, Ordering::SeqCst);
            let tracks = vec![
                LocalTrack::new(format!("LT-audio-{n}"), TrackKind::Audio),
                LocalTrack::new(format!("LT-video-{n}"), TrackKind::Video),
            ];
            self.acquired.lock().unwrap().extend(tracks.iter().cloned());
            Ok(tracks)
        }

        async fn connect(
            &self,
            _token: &str,
            options: ConnectOptions,
        ) -> Result<(Arc<dyn RoomHandle>, mpsc::UnboundedReceiver<RoomEvent>), HuddleError>
        {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.connect_fails.load(Ordering::SeqCst) {
                return Err(HuddleError::PlatformConnect("refused".to_string()));
            }
            let tracks = if options.tracks.is_empty() {
                self.create_local_tracks().await?
            } else {
                options.tracks.clone()
            };
            let room = Arc::new(StubRoom {
                name: options.room_name.clone(),
                tracks,
                remotes: self.remotes.lock().unwrap().clone(),
                disconnects: AtomicUsize::new(0),
            });
            self.rooms.lock().unwrap().push(room.clone());
            let (tx, rx) = mpsc::unbounded_channel();
            *self.events_tx.lock().unwrap() = Some(tx);
            Ok((room, rx))
        }
    }

    struct Capture {
        events: std::sync::Mutex<Vec<SessionEvent>>,
    }

    impl Capture {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn left_reason(&self) -> Option<DisconnectReason> {
            self.events.lock().unwrap().iter().find_map(|e| match e {
                SessionEvent::Left { reason } => Some(*reason),
                _ => None,
            })
        }

        fn participant_left(&self, identity: &str) -> bool {
            self.events.lock().unwrap().iter().any(|e| {
                matches!(e, SessionEvent::ParticipantLeft(who) if who == identity)
            })
        }

        fn media_failure(&self) -> Option<String> {
            self.events.lock().unwrap().iter().find_map(|e| match e {
                SessionEvent::MediaFailed { message } => Some(message.clone()),
                _ => None,
            })
        }
    }

    impl SessionEventListener for Capture {
        fn on_event(&self, event: SessionEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    // Parks the task emitting the first event matching `trigger` until the
    // test sends on the release channel. Needs a multi thread runtime.
    struct Holdup {
        trigger: fn(&SessionEvent) -> bool,
        entered: AtomicBool,
        tripped: AtomicBool,
        release: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl Holdup {
        fn new(trigger: fn(&SessionEvent) -> bool) -> (Arc<Self>, std::sync::mpsc::Sender<()>) {
            let (tx, rx) = std::sync::mpsc::channel();
            (
                Arc::new(Self {
                    trigger,
                    entered: AtomicBool::new(false),
                    tripped: AtomicBool::new(false),
                    release: std::sync::Mutex::new(rx),
                }),
                tx,
            )
        }

        async fn wait_entered(&self) {
            for _ in 0..400 {
                if self.entered.load(Ordering::SeqCst) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("listener never reached the held event");
        }
    }

    impl SessionEventListener for Holdup {
        fn on_event(&self, event: SessionEvent) {
            if !(self.trigger)(&event) || self.tripped.swap(true, Ordering::SeqCst) {
                return;
            }
            self.entered.store(true, Ordering::SeqCst);
            let _ = self.release.lock().unwrap().recv();
        }
    }

    async fn wait_for_state(session: &Session, want: SessionState) {
        for _ in 0..400 {
            if session.state().await == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for state {want:?}");
    }

    async fn wait_for_remote_count(session: &Session, want: usize) {
        for _ in 0..400 {
            if session.remote_elements().await.len() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {want} remote elements");
    }

    fn video_track(sid: &str) -> TrackInfo {
        TrackInfo {
            sid: sid.to_string(),
            kind: TrackKind::Video,
        }
    }

    #[tokio::test]
    async fn preview_acquires_once() {
        let platform = StubPlatform::new();
        let session = Session::new(platform.clone(), StubTokens::new());

        let first = session.preview().await.unwrap();
        let second = session.preview().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(platform.acquisitions.load(Ordering::SeqCst), 1);
        assert_eq!(session.state().await, SessionState::Previewing);
        assert_eq!(session.local_elements().await.len(), 2);
    }

    #[tokio::test]
    async fn preview_failure_leaves_session_idle() {
        let platform = StubPlatform::new();
        platform.media_denied.store(true, Ordering::SeqCst);
        let capture = Capture::new();
        let session = Session::new(platform.clone(), StubTokens::new());
        session.add_listener(capture.clone());

        let err = session.preview().await.unwrap_err();
        assert!(matches!(err, HuddleError::MediaAcquisition(_)));
        assert_eq!(session.state().await, SessionState::Idle);
        assert!(session.local_elements().await.is_empty());

        // The denial reaches listeners the same way connect failures do.
        let message = capture.media_failure().unwrap();
        assert!(message.contains("permission denied"));
    }

    #[tokio::test]
    async fn join_attaches_existing_participant_tracks() {
        let platform = StubPlatform::new();
        platform.seed_remote("bob", vec![video_track("MT-bob")]);
        let session = Session::new(platform.clone(), StubTokens::new());

        session.join().await.unwrap();

        assert_eq!(session.state().await, SessionState::Joined);
        assert_eq!(session.active_room().await.as_deref(), Some("ab1cd"));

        let remote = session.remote_elements().await;
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].owner, TrackOwner::Remote("bob".to_string()));

        let roster = session.participants().await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].identity, "bob");

        // No preview ran, so the platform acquired tracks for the join.
        assert!(session.local_elements().await.iter().any(|e| e.kind == TrackKind::Video));
    }

    #[tokio::test]
    async fn join_reuses_preview_tracks_without_reattaching() {
        let platform = StubPlatform::new();
        let session = Session::new(platform.clone(), StubTokens::new());

        session.preview().await.unwrap();
        session.join().await.unwrap();

        assert_eq!(platform.acquisitions.load(Ordering::SeqCst), 1);
        assert_eq!(session.local_elements().await.len(), 2);
        assert_eq!(session.state().await, SessionState::Joined);
    }

    #[tokio::test]
    async fn second_join_while_connecting_is_rejected() {
        let gate = Arc::new(Notify::new());
        let platform = StubPlatform::gated(gate.clone());
        let session = Arc::new(Session::new(platform.clone(), StubTokens::new()));

        let in_flight = {
            let session = session.clone();
            tokio::spawn(async move { session.join().await })
        };
        wait_for_state(&session, SessionState::Connecting).await;

        let err = session.join().await.unwrap_err();
        assert!(matches!(
            err,
            HuddleError::InvalidTransition {
                state: SessionState::Connecting,
                ..
            }
        ));

        gate.notify_one();
        in_flight.await.unwrap().unwrap();
        assert_eq!(session.state().await, SessionState::Joined);
    }

    #[tokio::test]
    async fn close_discards_a_late_connect() {
        let gate = Arc::new(Notify::new());
        let platform = StubPlatform::gated(gate.clone());
        let session = Arc::new(Session::new(platform.clone(), StubTokens::new()));

        let in_flight = {
            let session = session.clone();
            tokio::spawn(async move { session.join().await })
        };
        wait_for_state(&session, SessionState::Connecting).await;

        session.close().await;
        gate.notify_one();

        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, HuddleError::Superseded));
        assert_eq!(session.state().await, SessionState::Idle);
        assert!(session.active_room().await.is_none());

        // The handle produced by the late connect was released.
        assert_eq!(platform.last_room().disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_during_join_seeding_leaves_nothing_behind() {
        let platform = StubPlatform::new();
        platform.seed_remote("bob", vec![video_track("MT-bob")]);
        let capture = Capture::new();
        let (hold, release) = Holdup::new(|e| matches!(e, SessionEvent::Joined { .. }));
        let session = Arc::new(Session::new(platform.clone(), StubTokens::new()));
        session.add_listener(capture.clone());
        session.add_listener(hold.clone());

        let joining = {
            let session = session.clone();
            tokio::spawn(async move { session.join().await })
        };
        hold.wait_entered().await;

        // The join committed but has not seeded yet. The close must wait
        // for the seeding to finish and then tear all of it down.
        let closing = {
            let session = session.clone();
            tokio::spawn(async move { session.close().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        release.send(()).unwrap();

        joining.await.unwrap().unwrap();
        closing.await.unwrap();

        assert_eq!(session.state().await, SessionState::Idle);
        assert!(session.active_room().await.is_none());
        assert!(session.local_elements().await.is_empty());
        assert!(session.remote_elements().await.is_empty());
        assert!(session.participants().await.is_empty());
        assert_eq!(capture.left_reason(), Some(DisconnectReason::ClientInitiated));
        assert_eq!(platform.last_room().disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn teardown_wins_over_an_in_flight_subscription() {
        let platform = StubPlatform::new();
        let capture = Capture::new();
        let (hold, release) = Holdup::new(|e| {
            matches!(e, SessionEvent::TrackAttached(el) if matches!(el.owner, TrackOwner::Remote(_)))
        });
        let session = Arc::new(Session::new(platform.clone(), StubTokens::new()));
        session.add_listener(capture.clone());
        session.add_listener(hold.clone());
        session.join().await.unwrap();

        let tx = platform.sender();
        tx.send(RoomEvent::ParticipantConnected(ParticipantInfo {
            identity: "bob".to_string(),
            tracks: Vec::new(),
        }))
        .unwrap();
        tx.send(RoomEvent::TrackSubscribed {
            track: video_track("MT-1"),
            participant: "bob".to_string(),
        })
        .unwrap();
        hold.wait_entered().await;

        // The pump is mid subscription; the leave's clears run after it
        // and win.
        let leaving = {
            let session = session.clone();
            tokio::spawn(async move { session.leave().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        release.send(()).unwrap();
        leaving.await.unwrap().unwrap();

        assert_eq!(session.state().await, SessionState::Idle);
        assert!(session.remote_elements().await.is_empty());
        assert!(session.participants().await.is_empty());
        assert_eq!(capture.left_reason(), Some(DisconnectReason::ClientInitiated));

        // Events still queued on the old room channel change nothing.
        tx.send(RoomEvent::TrackSubscribed {
            track: video_track("MT-2"),
            participant: "bob".to_string(),
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(session.remote_elements().await.is_empty());
        assert_eq!(session.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn token_failure_returns_to_idle() {
        let platform = StubPlatform::new();
        let tokens = StubTokens::new();
        tokens.fail.store(true, Ordering::SeqCst);
        let session = Session::new(platform, tokens);

        let err = session.join().await.unwrap_err();
        assert!(matches!(err, HuddleError::TokenFetch(_)));
        assert_eq!(session.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn connect_failure_returns_to_idle_keeping_preview() {
        let platform = StubPlatform::new();
        let session = Session::new(platform.clone(), StubTokens::new());

        session.preview().await.unwrap();
        platform.connect_fails.store(true, Ordering::SeqCst);

        let err = session.join().await.unwrap_err();
        assert!(matches!(err, HuddleError::PlatformConnect(_)));
        assert_eq!(session.state().await, SessionState::Idle);

        // Preview survives the failure: still rendered, tracks still live.
        assert_eq!(session.local_elements().await.len(), 2);
        assert!(platform.acquired_tracks().iter().all(|t| !t.is_stopped()));

        // And a retry does not re-acquire media.
        platform.connect_fails.store(false, Ordering::SeqCst);
        session.preview().await.unwrap();
        assert_eq!(platform.acquisitions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn leave_tears_the_session_down() {
        let platform = StubPlatform::new();
        platform.seed_remote("bob", vec![video_track("MT-bob")]);
        let capture = Capture::new();
        let session = Session::new(platform.clone(), StubTokens::new());
        session.add_listener(capture.clone());

        session.preview().await.unwrap();
        session.join().await.unwrap();
        session.leave().await.unwrap();

        assert_eq!(session.state().await, SessionState::Idle);
        assert!(session.active_room().await.is_none());
        assert!(session.local_elements().await.is_empty());
        assert!(session.remote_elements().await.is_empty());
        assert!(session.participants().await.is_empty());
        assert_eq!(platform.last_room().disconnects.load(Ordering::SeqCst), 1);
        assert!(platform.acquired_tracks().iter().all(|t| t.is_stopped()));
        assert_eq!(capture.left_reason(), Some(DisconnectReason::ClientInitiated));

        let err = session.leave().await.unwrap_err();
        assert!(matches!(err, HuddleError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn pump_attaches_and_detaches_subscribed_tracks() {
        let platform = StubPlatform::new();
        let session = Session::new(platform.clone(), StubTokens::new());
        session.join().await.unwrap();

        let tx = platform.sender();
        tx.send(RoomEvent::ParticipantConnected(ParticipantInfo {
            identity: "bob".to_string(),
            tracks: Vec::new(),
        }))
        .unwrap();
        tx.send(RoomEvent::TrackSubscribed {
            track: video_track("MT-1"),
            participant: "bob".to_string(),
        })
        .unwrap();
        wait_for_remote_count(&session, 1).await;

        // A duplicate subscription must not add a second element.
        tx.send(RoomEvent::TrackSubscribed {
            track: video_track("MT-1"),
            participant: "bob".to_string(),
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(session.remote_elements().await.len(), 1);

        tx.send(RoomEvent::TrackUnsubscribed {
            track: video_track("MT-1"),
            participant: "bob".to_string(),
        })
        .unwrap();
        wait_for_remote_count(&session, 0).await;
        assert_eq!(session.state().await, SessionState::Joined);
    }

    #[tokio::test]
    async fn participant_disconnect_detaches_only_their_tracks() {
        let platform = StubPlatform::new();
        let capture = Capture::new();
        let session = Session::new(platform.clone(), StubTokens::new());
        session.add_listener(capture.clone());
        session.join().await.unwrap();

        let tx = platform.sender();
        for (identity, sid) in [("bob", "MT-b"), ("carol", "MT-c")] {
            tx.send(RoomEvent::ParticipantConnected(ParticipantInfo {
                identity: identity.to_string(),
                tracks: Vec::new(),
            }))
            .unwrap();
            tx.send(RoomEvent::TrackSubscribed {
                track: video_track(sid),
                participant: identity.to_string(),
            })
            .unwrap();
        }
        wait_for_remote_count(&session, 2).await;

        tx.send(RoomEvent::ParticipantDisconnected(ParticipantInfo {
            identity: "bob".to_string(),
            tracks: Vec::new(),
        }))
        .unwrap();
        wait_for_remote_count(&session, 1).await;

        let remote = session.remote_elements().await;
        assert_eq!(remote[0].owner, TrackOwner::Remote("carol".to_string()));
        assert!(capture.participant_left("bob"));
        assert_eq!(session.participants().await.len(), 1);
    }

    #[tokio::test]
    async fn platform_disconnect_tears_down_with_its_reason() {
        let platform = StubPlatform::new();
        let capture = Capture::new();
        let session = Session::new(platform.clone(), StubTokens::new());
        session.add_listener(capture.clone());

        session.preview().await.unwrap();
        session.join().await.unwrap();

        platform
            .sender()
            .send(RoomEvent::Disconnected {
                reason: DisconnectReason::DurationLimitReached,
            })
            .unwrap();

        wait_for_state(&session, SessionState::Idle).await;
        assert!(session.active_room().await.is_none());
        assert!(session.local_elements().await.is_empty());
        assert!(platform.acquired_tracks().iter().all(|t| t.is_stopped()));
        assert_eq!(
            capture.left_reason(),
            Some(DisconnectReason::DurationLimitReached)
        );
    }

    #[tokio::test]
    async fn close_is_safe_in_any_state() {
        let platform = StubPlatform::new();
        let session = Session::new(platform.clone(), StubTokens::new());

        session.close().await;
        assert_eq!(session.state().await, SessionState::Idle);

        session.join().await.unwrap();
        session.close().await;
        session.close().await;

        assert_eq!(session.state().await, SessionState::Idle);
        assert_eq!(platform.last_room().disconnects.load(Ordering::SeqCst), 1);
    }
}
