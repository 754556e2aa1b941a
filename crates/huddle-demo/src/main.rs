//! Runnable quickstart: token service, loopback platform and a scripted
//! two-party call in one process.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use huddle_core::credential::CredentialBuilder;
use huddle_core::events::{SessionEvent, SessionEventListener, TrackKind};
use huddle_core::platform::{ConnectOptions, LocalTrack, Platform};
use huddle_core::{HuddleError, Session, TokenClient};
use huddle_loopback::{LoopbackConfig, LoopbackPlatform};
use huddle_token::{Config, TokenServer, TokenService};

/// Beat between scripted steps so the activity log reads like a call.
const PACE: Duration = Duration::from_millis(250);

/// Prints session events the way the original demo page logged them.
struct ActivityLog;

impl SessionEventListener for ActivityLog {
    fn on_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged(state) => println!("> state: {state:?}"),
            SessionEvent::PreviewStarted { tracks } => {
                println!("> previewing {} local tracks", tracks.len());
            }
            SessionEvent::MediaFailed { message } => {
                println!("> unable to access camera and microphone: {message}");
            }
            SessionEvent::Joined { room, identity } => {
                println!("> joined room '{room}' as '{identity}'");
            }
            SessionEvent::ConnectFailed { message } => println!("> could not connect: {message}"),
            SessionEvent::ParticipantJoined(info) => {
                println!("> {} joined the room", info.identity);
            }
            SessionEvent::ParticipantLeft(identity) => println!("> {identity} left the room"),
            SessionEvent::TrackAttached(element) => {
                println!("> attached {:?} track {}", element.kind, element.track_sid);
            }
            SessionEvent::TrackDetached(element) => {
                println!("> detached {:?} track {}", element.kind, element.track_sid);
            }
            SessionEvent::Left { reason } => println!("> left the room ({reason:?})"),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| {
                "huddle_core=info,huddle_token=info,huddle_loopback=info,huddle_demo=info"
                    .parse()
                    .unwrap()
            },
        ))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("{e}; falling back to generated dev credentials");
            Config::dev()
        }
    };

    let platform = Arc::new(LoopbackPlatform::new(LoopbackConfig::new(
        config.api_secret.clone(),
    )));

    // One room per process lifetime. Failing to create it is fatal and no
    // token is ever issued.
    let service = match TokenService::provision(platform.as_ref(), config.clone()).await {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!("could not create the room: {e}");
            return;
        }
    };

    let server = match TokenServer::bind(&format!("0.0.0.0:{}", config.port), service).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("could not bind port {}: {e}", config.port);
            return;
        }
    };
    let port = match server.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            tracing::error!("could not read the bound address: {e}");
            return;
        }
    };
    tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            tracing::error!("token server failed: {e}");
        }
    });

    let session = Session::new(
        platform.clone(),
        Arc::new(TokenClient::new(format!("http://127.0.0.1:{port}"))),
    );
    session.add_listener(Arc::new(ActivityLog));

    tokio::select! {
        result = run_scenario(&session, platform, &config) => {
            if let Err(e) = result {
                tracing::error!("demo scenario failed: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, leaving the room");
        }
    }

    // Unload path: always disconnect before exiting, whatever state the
    // scripted call was in.
    session.close().await;
    sleep(Duration::from_millis(100)).await;
}

/// The scripted call: preview, join over real HTTP, a peer drops in and
/// shares a track, everyone leaves.
async fn run_scenario(
    session: &Session,
    platform: Arc<LoopbackPlatform>,
    config: &Config,
) -> Result<(), HuddleError> {
    session.preview().await?;
    sleep(PACE).await;

    session.join().await?;
    let room_name = session
        .active_room()
        .await
        .ok_or_else(|| HuddleError::PlatformConnect("no active room after join".to_string()))?;
    sleep(PACE).await;

    // A scripted peer joins and shares a screen track for a moment.
    let peer_token = CredentialBuilder::new(
        config.account_sid.as_str(),
        config.api_key.as_str(),
        config.api_secret.as_str(),
    )
    .identity("bob")
    .video_grant(room_name.as_str())
    .sign()
    .map_err(|e| HuddleError::PlatformConnect(format!("could not sign peer credential: {e}")))?;
    let (peer, _peer_events) = platform
        .connect(
            &peer_token,
            ConnectOptions {
                room_name,
                tracks: Vec::new(),
            },
        )
        .await?;
    sleep(PACE).await;

    let screen = LocalTrack::new("MT-bob-screen", TrackKind::Video);
    peer.publish_track(screen).await?;
    sleep(PACE).await;

    peer.unpublish_track("MT-bob-screen").await?;
    sleep(PACE).await;

    peer.disconnect().await;
    sleep(PACE).await;

    session.leave().await?;
    Ok(())
}
