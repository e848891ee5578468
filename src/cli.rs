use crate::config::{BoardConfig, Capabilities, ConfigError, ReconnectPolicy, SyncConfig};
use crate::jobs::tools::ScriptTool;
use crate::sync::marker::{read_marker, validate_workspace_id};
use crate::sync::watcher::WatchOptions;
use crate::DEFAULT_SERVER_URL;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// CLI arguments for workspace-sync
#[derive(Parser, Debug)]
#[clap(name = "workspace-sync")]
#[clap(about = "Keeps a local directory in sync with a remote workspace", long_about = None)]
pub struct Args {
    /// Hexadecimal workspace ID (falls back to the .wid marker in --dir)
    #[arg(short, long, env = "WORKSPACE_SYNC_ID")]
    pub workspace_id: Option<String>,

    /// Local workspace directory
    #[arg(short, long, default_value = ".", env = "WORKSPACE_SYNC_DIR")]
    pub dir: PathBuf,

    /// Server URL
    #[arg(short, long, default_value = DEFAULT_SERVER_URL, env = "WORKSPACE_SYNC_SERVER")]
    pub server: String,

    /// Serial port of an attached board; enables device programming
    #[arg(long, value_name = "PORT")]
    pub com_port: Option<String>,

    /// Programmer executable used with --com-port
    #[arg(long, default_value = "fpga_programmer", env = "FPGA_PROGRAMMER")]
    pub programmer: PathBuf,

    /// Synthesis tool for a vendor (repeatable), e.g. --build-tool xilinx=/opt/syn.sh
    #[arg(long = "build-tool", value_name = "VENDOR=PROGRAM")]
    pub build_tools: Vec<String>,

    /// Minutes before a synthesis run is killed
    #[arg(long, default_value = "30")]
    pub tool_timeout_minutes: u64,

    /// Concurrent build jobs (default: half the cores)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Reconnect attempts after a lost connection (0 = never)
    #[arg(long, default_value = "5")]
    pub reconnect_attempts: u32,
}

impl Args {
    pub fn capabilities(&self) -> Result<Capabilities, ConfigError> {
        let mut capabilities = Capabilities {
            board: self.com_port.as_ref().map(|port| BoardConfig {
                com_port: port.clone(),
                programmer: self.programmer.clone(),
            }),
            tool_timeout: Duration::from_secs(self.tool_timeout_minutes * 60),
            ..Capabilities::default()
        };
        if let Some(workers) = self.workers {
            capabilities.workers = workers.max(1);
        }
        for spec in &self.build_tools {
            let tool =
                ScriptTool::parse(spec).ok_or_else(|| ConfigError::InvalidTool(spec.clone()))?;
            capabilities.tools.register(Arc::new(tool));
        }
        Ok(capabilities)
    }

    /// Resolve the workspace ID and build the session configuration.
    ///
    /// An explicit ID wins over the marker file in the directory.
    pub async fn into_config(self) -> Result<SyncConfig, ConfigError> {
        let workspace_id = match &self.workspace_id {
            Some(id) => validate_workspace_id(id)?,
            None => read_marker(&self.dir)
                .await?
                .ok_or_else(|| ConfigError::MissingWorkspaceId(self.dir.clone()))?,
        };
        let capabilities = self.capabilities()?;
        Ok(SyncConfig {
            server_url: self.server,
            workspace_id,
            root: self.dir,
            capabilities,
            watch: WatchOptions::default(),
            reconnect: ReconnectPolicy {
                max_attempts: self.reconnect_attempts,
                ..ReconnectPolicy::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::marker::write_marker;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(std::iter::once("workspace-sync").chain(args.iter().copied()))
    }

    #[tokio::test]
    async fn test_explicit_id_wins_over_marker() {
        let dir = tempdir().unwrap();
        write_marker(dir.path(), "AAAA").await.unwrap();
        let dir_arg = dir.path().to_string_lossy().to_string();

        let config = parse(&["-w", "beef", "-d", &dir_arg])
            .into_config()
            .await
            .unwrap();
        assert_eq!(config.workspace_id, "BEEF");
    }

    #[tokio::test]
    async fn test_marker_resumes_workspace() {
        let dir = tempdir().unwrap();
        write_marker(dir.path(), "abc123").await.unwrap();
        let dir_arg = dir.path().to_string_lossy().to_string();

        let config = parse(&["-d", &dir_arg]).into_config().await.unwrap();
        assert_eq!(config.workspace_id, "ABC123");
    }

    #[tokio::test]
    async fn test_missing_id_fails() {
        let dir = tempdir().unwrap();
        let dir_arg = dir.path().to_string_lossy().to_string();
        let err = parse(&["-d", &dir_arg]).into_config().await.unwrap_err();
        assert!(matches!(err, ConfigError::MissingWorkspaceId(_)));
    }

    #[test]
    fn test_capabilities_from_flags() {
        let args = parse(&[
            "--com-port",
            "/dev/ttyUSB0",
            "--build-tool",
            "Xilinx=/opt/syn.sh",
            "--workers",
            "0",
        ]);
        let capabilities = args.capabilities().unwrap();
        assert_eq!(capabilities.board.unwrap().com_port, "/dev/ttyUSB0");
        assert!(capabilities.tools.for_vendor("xilinx").is_some());
        assert_eq!(capabilities.workers, 1);

        let bad = parse(&["--build-tool", "xilinx"]);
        assert!(matches!(
            bad.capabilities(),
            Err(ConfigError::InvalidTool(_))
        ));
    }
}
