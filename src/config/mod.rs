//! Configuration
//!
//! The bridge base URL is owned by whatever hosts the camera plugin; this
//! module only gives it a typed home alongside the session timers.

mod schema;
mod store;

pub use schema::{AppConfig, BridgeConfig, SessionConfig};
pub use store::{load_config, validate, BRIDGE_URL_ENV};
