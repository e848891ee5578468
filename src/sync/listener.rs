//! Observer for everything the sync client does.
//!
//! All errors, status changes and file operations flow through a single
//! [`WorkspaceListener`], so nothing fails silently.

use crate::sync::types::{ConnectionStatus, FileOp, Message, Severity};
use std::path::Path;
use tracing::{debug, error, info, warn};

pub trait WorkspaceListener: Send + Sync {
    fn connection_status(&self, status: ConnectionStatus);

    fn log(&self, severity: Severity, message: &str);

    fn incoming_message(&self, message: &Message);

    fn file_operation(&self, op: FileOp, local_file: &Path);

    /// Report an error value at ERROR severity.
    fn log_error(&self, err: &dyn std::error::Error) {
        self.log(Severity::Error, &err.to_string());
    }
}

/// Listener that forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl WorkspaceListener for TracingListener {
    fn connection_status(&self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Error => error!("Connection status: {}", status),
            ConnectionStatus::Reconnect => warn!("Connection status: {}", status),
            _ => info!("Connection status: {}", status),
        }
    }

    fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
    }

    fn incoming_message(&self, message: &Message) {
        debug!(
            "Incoming message {} from {}",
            message.subject, message.origin_client_id
        );
    }

    fn file_operation(&self, op: FileOp, local_file: &Path) {
        info!("{} {}", op, local_file.display());
    }
}
