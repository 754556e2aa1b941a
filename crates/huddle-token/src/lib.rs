//! Token service: provisions the shared room at startup and mints access
//! credentials for callers over HTTP.

pub mod config;
pub mod errors;
pub mod names;
pub mod routes;
pub mod server;
pub mod service;

pub use config::{Config, ConfigError};
pub use errors::ServiceError;
pub use server::TokenServer;
pub use service::TokenService;
