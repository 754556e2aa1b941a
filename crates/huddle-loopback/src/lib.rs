//! In-process stand-in for the video platform. Verifies credentials, keeps
//! membership and track state per room, fans out room events and enforces
//! the session duration cap. No media is captured or carried.

mod platform;
mod room;

pub use platform::{LoopbackConfig, LoopbackPlatform};
