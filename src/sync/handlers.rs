//! Handlers for the workspace subjects and the routing table that wires
//! them up from the configured capabilities.

use crate::config::Capabilities;
use crate::jobs::{BuildRequestHandler, JobSet, ProgramDeviceHandler};
use crate::sync::engine::SyncEngine;
use crate::sync::router::{HandlerError, MessageHandler, RoutingTable};
use crate::sync::subjects::{
    BOARD_AVAILABLE, BOARD_CONFIGURE, CLIENT_CONNECTED, COMPILER, SERVICE_DISCOVER,
    SYNTHESIS_AVAILABLE, SYNTHESIS_RUN, WORK_ADDED, WORK_CREATED_WORKSPACE, WORK_DELETED,
    WORK_UPDATED,
};
use crate::sync::transport::Remote;
use crate::sync::types::{CompileInfo, FileEntry, Message, RepoInfo};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// `work:added` / `work:updated`: a list of entries to converge on.
pub struct FileEntriesHandler {
    engine: Arc<SyncEngine>,
}

impl FileEntriesHandler {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl MessageHandler for FileEntriesHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let entries: Vec<FileEntry> = message
            .decode_payload()
            .map_err(|e| HandlerError::payload(message, e))?;
        for entry in &entries {
            if let Err(e) = self.engine.apply_remote_entry(entry).await {
                self.engine.listener().log_error(&e);
            }
        }
        Ok(())
    }
}

/// `work:deleted`: one entry removed on the server.
pub struct RemoteDeleteHandler {
    engine: Arc<SyncEngine>,
}

impl RemoteDeleteHandler {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl MessageHandler for RemoteDeleteHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let entry: FileEntry = message
            .decode_payload()
            .map_err(|e| HandlerError::payload(message, e))?;
        self.engine.apply_remote_delete(&entry).await?;
        Ok(())
    }
}

/// `compiler`: build results whose outputs should exist locally.
pub struct CompileResultHandler {
    engine: Arc<SyncEngine>,
}

impl CompileResultHandler {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl MessageHandler for CompileResultHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let infos: Vec<CompileInfo> = message
            .decode_payload()
            .map_err(|e| HandlerError::payload(message, e))?;
        for info in &infos {
            self.engine.apply_compile_info(info).await;
        }
        Ok(())
    }
}

/// `work:createdWorkspace`: a full snapshot replacing the manifest.
pub struct SnapshotHandler {
    engine: Arc<SyncEngine>,
}

impl SnapshotHandler {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl MessageHandler for SnapshotHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let repo: RepoInfo = message
            .decode_payload()
            .map_err(|e| HandlerError::payload(message, e))?;
        let failures = self.engine.apply_snapshot(&repo).await;
        debug!(
            "Snapshot with {} files applied, {} failed",
            repo.files.len(),
            failures
        );
        Ok(())
    }
}

/// Announces the services this client offers.
pub struct ServiceAdvertiser {
    remote: Arc<dyn Remote>,
    synthesis: bool,
    board: bool,
}

impl ServiceAdvertiser {
    pub fn new(remote: Arc<dyn Remote>, capabilities: &Capabilities) -> Self {
        Self {
            remote,
            synthesis: capabilities.synthesis_available(),
            board: capabilities.board_available(),
        }
    }

    /// Post one availability message per offered service.
    pub async fn announce(&self) -> Result<usize, HandlerError> {
        let mut sent = 0;
        if self.synthesis {
            self.remote
                .post_message(SYNTHESIS_AVAILABLE, None, serde_json::Value::Null)
                .await?;
            sent += 1;
        }
        if self.board {
            self.remote
                .post_message(BOARD_AVAILABLE, None, serde_json::Value::Null)
                .await?;
            sent += 1;
        }
        if sent > 0 {
            info!("Announced {} service(s)", sent);
        }
        Ok(sent)
    }
}

#[async_trait]
impl MessageHandler for ServiceAdvertiser {
    async fn handle(&self, _message: &Message) -> Result<(), HandlerError> {
        self.announce().await.map(|_| ())
    }
}

/// Register every handler the capabilities call for.
pub fn build_routing_table(
    engine: Arc<SyncEngine>,
    capabilities: &Capabilities,
    jobs: Arc<JobSet>,
) -> (RoutingTable, Arc<ServiceAdvertiser>) {
    let remote = engine.remote().clone();
    let advertiser = Arc::new(ServiceAdvertiser::new(remote.clone(), capabilities));
    let entries: Arc<dyn MessageHandler> = Arc::new(FileEntriesHandler::new(engine.clone()));

    let mut table = RoutingTable::new()
        .with(WORK_ADDED, entries.clone())
        .with(WORK_UPDATED, entries)
        .with(WORK_DELETED, Arc::new(RemoteDeleteHandler::new(engine.clone())))
        .with(COMPILER, Arc::new(CompileResultHandler::new(engine.clone())))
        .with(
            WORK_CREATED_WORKSPACE,
            Arc::new(SnapshotHandler::new(engine.clone())),
        )
        .with(CLIENT_CONNECTED, advertiser.clone())
        .with(SERVICE_DISCOVER, advertiser.clone());

    if capabilities.synthesis_available() {
        table.insert(
            SYNTHESIS_RUN,
            Arc::new(BuildRequestHandler::new(
                engine.root().to_path_buf(),
                capabilities.tools.clone(),
                capabilities.tool_timeout,
                capabilities.workers,
                remote.clone(),
                engine.offset().clone(),
                engine.listener().clone(),
                jobs.clone(),
            )),
        );
    }
    if let Some(board) = &capabilities.board {
        table.insert(
            BOARD_CONFIGURE,
            Arc::new(ProgramDeviceHandler::new(
                engine.root().to_path_buf(),
                board.clone(),
                remote,
                engine.offset().clone(),
                engine.listener().clone(),
                jobs,
            )),
        );
    }
    (table, advertiser)
}
