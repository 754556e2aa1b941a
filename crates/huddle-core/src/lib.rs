//! Huddle core business logic.
//!
//! Pure Rust crate with no UI dependencies: the session state machine
//! plus the credential format and platform traits it is built on.
//! Consumed by the token service, the loopback platform and the demo
//! shell.

pub mod auth;
pub mod credential;
pub mod errors;
pub mod events;
pub mod participants;
pub mod platform;
pub mod session;
pub mod view;

pub use auth::{TokenClient, TokenResponse, TokenSource};
pub use errors::HuddleError;
pub use events::{DisconnectReason, SessionEvent, SessionState};
pub use session::Session;
