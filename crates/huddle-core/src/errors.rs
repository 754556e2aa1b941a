use thiserror::Error;

use crate::events::SessionState;

#[derive(Debug, Error)]
pub enum HuddleError {
    #[error("token fetch failed: {0}")]
    TokenFetch(String),
    #[error("could not connect to the platform: {0}")]
    PlatformConnect(String),
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(String),
    #[error("platform unavailable: {0}")]
    PlatformUnavailable(String),
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },
    #[error("session was superseded before connect completed")]
    Superseded,
}
