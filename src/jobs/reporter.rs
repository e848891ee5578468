use super::{JobError, ProgressReporter};
use crate::sync::clock::ClockOffset;
use crate::sync::file_times::local_mtime;
use crate::sync::hash::compute_file_hash;
use crate::sync::transport::Remote;
use crate::sync::types::{CompileInfo, FileRecord, ProgressFeedback, ProgressKind};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Reports job progress and artifacts to the server.
pub struct RemoteReporter {
    remote: Arc<dyn Remote>,
    offset: Arc<ClockOffset>,
    progress_subject: &'static str,
    result_subject: Option<&'static str>,
    /// Workspace file that triggered the job
    info_source: String,
}

impl RemoteReporter {
    pub fn new(
        remote: Arc<dyn Remote>,
        offset: Arc<ClockOffset>,
        progress_subject: &'static str,
        result_subject: Option<&'static str>,
        info_source: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            offset,
            progress_subject,
            result_subject,
            info_source: info_source.into(),
        }
    }
}

#[async_trait]
impl ProgressReporter for RemoteReporter {
    async fn report_progress(
        &self,
        kind: ProgressKind,
        progress: Option<f64>,
        message: Option<String>,
    ) -> Result<(), JobError> {
        debug!("{} {} {:?}", self.progress_subject, kind, message);
        let feedback = ProgressFeedback::new(kind, progress, message);
        let payload = serde_json::to_value(&feedback).map_err(crate::sync::TransportError::from)?;
        self.remote
            .post_message(self.progress_subject, Some("ProgressFeedback"), payload)
            .await?;
        Ok(())
    }

    async fn report_file(
        &self,
        info: &mut CompileInfo,
        local: &Path,
        rel_path: &str,
    ) -> Result<FileRecord, JobError> {
        let record = FileRecord {
            rel_path: rel_path.to_string(),
            content_hash: compute_file_hash(local).await?,
            last_modified: Some(self.offset.to_remote(local_mtime(local).await?)),
            source_uri: String::new(),
        };
        info.outputs.push(record.clone());
        self.remote
            .upload_derived_file(local, rel_path, info, &self.info_source)
            .await?;
        Ok(record)
    }

    async fn report_result(&self, info: CompileInfo) -> Result<(), JobError> {
        let Some(subject) = self.result_subject else {
            return Ok(());
        };
        let payload =
            serde_json::to_value(vec![info]).map_err(crate::sync::TransportError::from)?;
        self.remote
            .post_message(subject, Some("CompileInfo[]"), payload)
            .await?;
        Ok(())
    }
}
