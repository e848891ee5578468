pub mod cli;
pub mod config;
pub mod jobs;
pub mod sync;

/// Default server base URL when none is configured.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// API version prefix shared by every workspace endpoint.
pub const API_PREFIX: &str = "/api/v0.1";

pub use config::{BoardConfig, Capabilities, ReconnectPolicy, SyncConfig};
pub use sync::session::WorkspaceSession;
