//! HTTP client operations for the sync client.
//!
//! This module talks to the workspace endpoints: client registration,
//! manifest snapshots, server time, messages, uploads, downloads and deletes.

use crate::sync::clock::TimeSource;
use crate::sync::file_times::set_mtime;
use crate::sync::hash::compute_content_hash;
use crate::sync::transport::{
    build_client_id_url, build_delete_url, build_download_url, build_message_url,
    build_server_time_url, build_workspace_url, Remote, TransportError,
};
use crate::sync::types::{CompileInfo, Message, RepoInfo};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Application identifier sent with derived-file uploads.
const APPLICATION_ID: &str = "WorkspaceSyncClient";

/// HTTP transport bound to one workspace.
pub struct HttpTransport {
    client: Client,
    server: String,
    workspace_id: String,
    client_id: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(server: impl Into<String>, workspace_id: &str) -> Self {
        Self::with_client(Client::new(), server, workspace_id)
    }

    pub fn with_client(client: Client, server: impl Into<String>, workspace_id: &str) -> Self {
        Self {
            client,
            server: server.into(),
            workspace_id: workspace_id.to_ascii_uppercase(),
            client_id: RwLock::new(None),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Client ID assigned by the server during the last connect.
    pub fn client_id(&self) -> Option<String> {
        self.client_id.read().ok().and_then(|id| id.clone())
    }

    fn require_client_id(&self) -> Result<String, TransportError> {
        self.client_id().ok_or(TransportError::NotConnected)
    }

    /// Ask the server for a client ID and remember it.
    pub async fn fetch_client_id(&self) -> Result<String, TransportError> {
        let url = build_client_id_url(&self.server, &self.workspace_id);
        let resp = expect_status(
            self.client.get(&url).send().await?,
            StatusCode::OK,
            "Fetching client ID",
        )
        .await?;
        let id = resp.text().await?.trim().to_string();
        if id.is_empty() {
            return Err(TransportError::InvalidResponse(
                "empty client ID".to_string(),
            ));
        }
        if let Ok(mut slot) = self.client_id.write() {
            *slot = Some(id.clone());
        }
        info!("Registered as client {}", id);
        Ok(id)
    }

    /// Fetch the full manifest snapshot of the workspace.
    pub async fn fetch_snapshot(&self) -> Result<RepoInfo, TransportError> {
        let url = build_workspace_url(&self.server, &self.workspace_id);
        debug!("Requesting manifest snapshot: {}", url);
        let resp = expect_status(
            self.client
                .get(&url)
                .header("accept", "application/json")
                .send()
                .await?,
            StatusCode::OK,
            "Fetching manifest",
        )
        .await?;
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn post_form(&self, form: Form, local: &Path) -> Result<(), TransportError> {
        let url = build_workspace_url(&self.server, &self.workspace_id);
        let resp = self
            .client
            .post(&url)
            .header("accept", "text/plain")
            .multipart(form)
            .send()
            .await?;
        expect_status(
            resp,
            StatusCode::CREATED,
            &format!("Uploading file {}", local.display()),
        )
        .await?;
        Ok(())
    }
}

/// Multipart body with the file bytes and their SHA-1.
async fn file_form(local: &Path, rel_path: &str) -> Result<Form, TransportError> {
    let bytes = tokio::fs::read(local).await?;
    let hash = compute_content_hash(&bytes);
    let part = Part::bytes(bytes)
        .file_name(rel_path.to_string())
        .mime_str("application/octet-stream")?;
    Ok(Form::new().part("file", part).text("sha1", hash))
}

/// Turn an unexpected status into [`TransportError::UnexpectedStatus`].
async fn expect_status(
    resp: Response,
    expected: StatusCode,
    operation: &str,
) -> Result<Response, TransportError> {
    if resp.status() == expected {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(TransportError::UnexpectedStatus {
        operation: operation.to_string(),
        status,
        body,
    })
}

fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.part", name))
}

#[async_trait]
impl TimeSource for HttpTransport {
    async fn server_time(&self) -> Result<i64, TransportError> {
        let resp = self
            .client
            .get(build_server_time_url(&self.server))
            .send()
            .await?;
        let resp = expect_status(resp, StatusCode::OK, "Fetching server time").await?;
        let text = resp.text().await?;
        text.trim()
            .parse::<i64>()
            .map_err(|e| TransportError::InvalidResponse(format!("server time '{}': {}", text, e)))
    }
}

#[async_trait]
impl Remote for HttpTransport {
    async fn post_message(
        &self,
        subject: &str,
        payload_type: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<(), TransportError> {
        let client_id = self.require_client_id()?;
        let message = Message::new(subject, payload_type, payload, client_id.clone());
        let body = serde_json::to_vec(&message)?;
        let url = build_message_url(&self.server, &self.workspace_id, &client_id);
        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::UnexpectedStatus {
                operation: format!("Posting message {}", subject),
                status,
                body,
            });
        }
        Ok(())
    }

    async fn upload_file(&self, local: &Path, rel_path: &str) -> Result<(), TransportError> {
        let form = file_form(local, rel_path).await?;
        self.post_form(form, local).await
    }

    async fn upload_derived_file(
        &self,
        local: &Path,
        rel_path: &str,
        info: &CompileInfo,
        info_source: &str,
    ) -> Result<(), TransportError> {
        let form = file_form(local, rel_path)
            .await?
            .text("applicationID", APPLICATION_ID)
            .text("compileInfo", serde_json::to_string(info)?)
            .text("compileInfoSrc", info_source.to_string());
        self.post_form(form, local).await
    }

    async fn download_file(
        &self,
        target: &Path,
        source: &str,
        modified: Option<i64>,
    ) -> Result<(), TransportError> {
        let url = build_download_url(&self.server, &self.workspace_id, source);
        debug!("Downloading {} -> {}", url, target.display());
        let resp = self.client.get(&url).send().await?;
        let resp = expect_status(resp, StatusCode::OK, &format!("Downloading {}", source)).await?;

        // Stream into a sibling so a broken transfer never truncates the target.
        let partial = partial_path(target);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => file.write_all(&bytes).await?,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(e.into());
                }
            }
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, target).await?;

        if let Some(ms) = modified {
            set_mtime(target, ms)?;
        }
        Ok(())
    }

    async fn delete_file(&self, rel_path: &str) -> Result<(), TransportError> {
        let url = build_delete_url(&self.server, &self.workspace_id, rel_path);
        let resp = self
            .client
            .delete(&url)
            .header("accept", "text/plain")
            .send()
            .await?;
        expect_status(resp, StatusCode::OK, &format!("Deleting file {}", rel_path)).await?;
        Ok(())
    }
}
