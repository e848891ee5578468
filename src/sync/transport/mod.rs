//! Transport layer for sync operations.
//!
//! - HTTP client operations (client.rs)
//! - URL building utilities (urls.rs)
//! - Server-push subscription (sse.rs)

pub mod client;
pub mod sse;
pub mod urls;

use crate::sync::types::CompileInfo;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub use client::HttpTransport;
pub use sse::{open_push_stream, pump_events};
pub use urls::{
    build_client_id_url, build_delete_url, build_download_url, build_message_url, build_push_url,
    build_server_time_url, build_streaming_url, build_workspace_url, encode_path, normalize_path,
};

/// Errors that can occur talking to the server.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{operation} failed, status was {status}: {body}")]
    UnexpectedStatus {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not connected: no client ID assigned yet")]
    NotConnected,

    #[error("Push stream error: {0}")]
    Stream(String),
}

/// Remote operations the sync engine and build jobs depend on.
///
/// Delivery is at most once: a failed call is reported to the caller and
/// never retried here.
#[async_trait]
pub trait Remote: Send + Sync {
    async fn post_message(
        &self,
        subject: &str,
        payload_type: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<(), TransportError>;

    /// Upload file bytes together with their hex SHA-1.
    async fn upload_file(&self, local: &Path, rel_path: &str) -> Result<(), TransportError>;

    /// Upload a build artifact together with the build result it belongs to.
    async fn upload_derived_file(
        &self,
        local: &Path,
        rel_path: &str,
        info: &CompileInfo,
        info_source: &str,
    ) -> Result<(), TransportError>;

    /// Fetch `source` into `target`, then stamp it with `modified` (local clock).
    async fn download_file(
        &self,
        target: &Path,
        source: &str,
        modified: Option<i64>,
    ) -> Result<(), TransportError>;

    async fn delete_file(&self, rel_path: &str) -> Result<(), TransportError>;
}
