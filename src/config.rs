//! Typed configuration consumed by the sync session.

use crate::jobs::handlers::default_workers;
use crate::jobs::tools::ToolRegistry;
use crate::sync::marker::{validate_workspace_id, WorkspaceIdError};
use crate::sync::watcher::WatchOptions;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default timeout for one synthesis run.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid workspace ID: {0}")]
    WorkspaceId(#[from] WorkspaceIdError),

    #[error("No workspace ID given and no marker file found in {0}")]
    MissingWorkspaceId(PathBuf),

    #[error("Invalid build tool '{0}', expected VENDOR=PROGRAM")]
    InvalidTool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serial programmer attached to a board.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub com_port: String,
    pub programmer: PathBuf,
}

/// What this client offers besides plain file sync.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub board: Option<BoardConfig>,
    pub tools: ToolRegistry,
    pub tool_timeout: Duration,
    /// Concurrent build jobs
    pub workers: usize,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            board: None,
            tools: ToolRegistry::new(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            workers: default_workers(),
        }
    }
}

impl Capabilities {
    pub fn synthesis_available(&self) -> bool {
        self.tools.any_available()
    }

    pub fn board_available(&self) -> bool {
        self.board.is_some()
    }
}

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after the first failure; 0 disables reconnecting
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn never() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before reconnect `attempt` (1-based), or `None` once exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(
            self.initial_delay
                .saturating_mul(factor)
                .min(self.max_delay),
        )
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub server_url: String,
    /// Upper-cased hex workspace ID
    pub workspace_id: String,
    pub root: PathBuf,
    pub capabilities: Capabilities,
    pub watch: WatchOptions,
    pub reconnect: ReconnectPolicy,
}

impl SyncConfig {
    pub fn new(
        server_url: impl Into<String>,
        workspace_id: &str,
        root: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            server_url: server_url.into(),
            workspace_id: validate_workspace_id(workspace_id)?,
            root: root.into(),
            capabilities: Capabilities::default(),
            watch: WatchOptions::default(),
            reconnect: ReconnectPolicy::default(),
        })
    }
}
