//! Message handlers that start build jobs.
//!
//! Handlers return as soon as the job is queued, so a long build never
//! holds up the push stream.

use super::reporter::RemoteReporter;
use super::supervisor::run_supervised;
use super::tools::{BoardSpec, SynthesisRequest, SynthesisSettings, ToolRegistry, SYNTHESIS_DIR};
use super::{JobError, JobSet, ProgressReporter};
use crate::config::BoardConfig;
use crate::sync::clock::ClockOffset;
use crate::sync::engine::local_path;
use crate::sync::listener::WorkspaceListener;
use crate::sync::router::{HandlerError, MessageHandler};
use crate::sync::subjects::{BOARD_PROGRESS, COMPILER_SYNTHESIS, SYNTHESIS_PROGRESS};
use crate::sync::transport::Remote;
use crate::sync::types::{FileRecord, Message, ProgressKind, Severity};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Timeout for flashing a device.
pub const PROGRAMMING_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Default worker count: half the cores, at least one.
pub fn default_workers() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores / 2).max(1)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, JobError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            JobError::MissingFile(path.to_path_buf())
        } else {
            JobError::Io(e)
        }
    })?;
    serde_json::from_slice(&bytes).map_err(|source| JobError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// VHDL sources directly in `root` and in `root/src-gen`, sorted.
pub async fn collect_sources(root: &Path) -> Result<Vec<PathBuf>, JobError> {
    let mut sources = Vec::new();
    for dir in [root.to_path_buf(), root.join("src-gen")] {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_vhdl = path
                .extension()
                .is_some_and(|ext| ext == "vhd" || ext == "vhdl");
            if is_vhdl && entry.file_type().await?.is_file() {
                found.push(path);
            }
        }
        found.sort();
        sources.extend(found);
    }
    Ok(sources)
}

/// Run one synthesis for the settings file at `settings_rel`.
pub async fn run_synthesis(
    root: &Path,
    settings_rel: &str,
    tools: &ToolRegistry,
    timeout: Duration,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<(), JobError> {
    let settings_file = local_path(root, settings_rel)?;
    let settings: SynthesisSettings = read_json(&settings_file).await?;
    let board: BoardSpec = read_json(&local_path(root, &settings.board)?).await?;

    let tool = tools
        .for_vendor(&board.fpga.vendor)
        .ok_or_else(|| JobError::NoTool {
            vendor: board.fpga.vendor.clone(),
            known: tools.vendors(),
        })?;

    let sources = collect_sources(root).await?;
    let synthesis_dir = local_path(root, SYNTHESIS_DIR)?;
    tokio::fs::create_dir_all(&synthesis_dir).await?;

    info!(
        "Running {} for {} with {} sources",
        tool.name(),
        settings.top_module,
        sources.len()
    );
    let request = SynthesisRequest {
        top_module: settings.top_module,
        sources,
        synthesis_dir,
        settings_file,
        board,
        timeout,
    };
    if let Some(info) = tool.run(&request, reporter.clone()).await? {
        if !info.outputs.is_empty() {
            reporter.report_result(info).await?;
        }
    }
    Ok(())
}

/// Starts a synthesis run for `service:synthesis:run`.
pub struct BuildRequestHandler {
    root: PathBuf,
    tools: ToolRegistry,
    timeout: Duration,
    remote: Arc<dyn Remote>,
    offset: Arc<ClockOffset>,
    listener: Arc<dyn WorkspaceListener>,
    permits: Arc<Semaphore>,
    jobs: Arc<JobSet>,
}

impl BuildRequestHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root: PathBuf,
        tools: ToolRegistry,
        timeout: Duration,
        workers: usize,
        remote: Arc<dyn Remote>,
        offset: Arc<ClockOffset>,
        listener: Arc<dyn WorkspaceListener>,
        jobs: Arc<JobSet>,
    ) -> Self {
        Self {
            root,
            tools,
            timeout,
            remote,
            offset,
            listener,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            jobs,
        }
    }
}

#[async_trait]
impl MessageHandler for BuildRequestHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let settings_rel: String = message
            .decode_payload()
            .map_err(|e| HandlerError::payload(message, e))?;

        let reporter: Arc<dyn ProgressReporter> = Arc::new(RemoteReporter::new(
            self.remote.clone(),
            self.offset.clone(),
            SYNTHESIS_PROGRESS,
            Some(COMPILER_SYNTHESIS),
            settings_rel.clone(),
        ));
        let root = self.root.clone();
        let tools = self.tools.clone();
        let timeout = self.timeout;
        let permits = self.permits.clone();
        let listener = self.listener.clone();

        self.jobs
            .spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let result =
                    run_synthesis(&root, &settings_rel, &tools, timeout, reporter.clone()).await;
                if let Err(e) = result {
                    listener.log(
                        Severity::Error,
                        &format!("Synthesis for {} failed: {}", settings_rel, e),
                    );
                    if let Err(report_err) = reporter
                        .report_progress(ProgressKind::Error, None, Some(e.to_string()))
                        .await
                    {
                        warn!("Failed to report synthesis error: {}", report_err);
                    }
                }
            })
            .await;
        Ok(())
    }
}

/// Flash `record` onto the configured board.
pub async fn program_device(
    root: &Path,
    board: &BoardConfig,
    record: &FileRecord,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<(), JobError> {
    let file = local_path(root, &record.rel_path)?;
    if !tokio::fs::try_exists(&file).await? {
        return Err(JobError::MissingFile(file));
    }
    let file = std::path::absolute(&file)?;

    let mut cmd = tokio::process::Command::new(&board.programmer);
    cmd.arg("-p").arg(&board.com_port).arg("-prg").arg(&file);
    let run = run_supervised(
        cmd,
        root,
        PROGRAMMING_TIMEOUT,
        "Programming",
        0.1,
        reporter.clone(),
    )
    .await?;

    if run.success() {
        reporter
            .report_progress(
                ProgressKind::Progress,
                Some(1.0),
                Some("FPGA configuration succeeded!".to_string()),
            )
            .await?;
        reporter
            .report_progress(ProgressKind::Done, None, None)
            .await?;
    } else if !run.timed_out {
        reporter
            .report_progress(
                ProgressKind::Error,
                None,
                Some(format!(
                    "Programming the FPGA did not exit normally, exit code was: {:?}",
                    run.exit_code()
                )),
            )
            .await?;
    }
    Ok(())
}

/// Programs the board for `service:board:configure`.
pub struct ProgramDeviceHandler {
    root: PathBuf,
    board: BoardConfig,
    remote: Arc<dyn Remote>,
    offset: Arc<ClockOffset>,
    listener: Arc<dyn WorkspaceListener>,
    jobs: Arc<JobSet>,
}

impl ProgramDeviceHandler {
    pub fn new(
        root: PathBuf,
        board: BoardConfig,
        remote: Arc<dyn Remote>,
        offset: Arc<ClockOffset>,
        listener: Arc<dyn WorkspaceListener>,
        jobs: Arc<JobSet>,
    ) -> Self {
        Self {
            root,
            board,
            remote,
            offset,
            listener,
            jobs,
        }
    }
}

#[async_trait]
impl MessageHandler for ProgramDeviceHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let record: FileRecord = message
            .decode_payload()
            .map_err(|e| HandlerError::payload(message, e))?;

        let reporter: Arc<dyn ProgressReporter> = Arc::new(RemoteReporter::new(
            self.remote.clone(),
            self.offset.clone(),
            BOARD_PROGRESS,
            None,
            record.rel_path.clone(),
        ));
        let root = self.root.clone();
        let board = self.board.clone();
        let listener = self.listener.clone();

        self.jobs
            .spawn(async move {
                if let Err(e) = program_device(&root, &board, &record, reporter).await {
                    listener.log(
                        Severity::Error,
                        &format!("Unable to program {}: {}", record.rel_path, e),
                    );
                }
            })
            .await;
        Ok(())
    }
}
