//! Workspace identifier marker file.
//!
//! A hidden file at the workspace root records the upper-cased hex
//! identifier so a later run can resume the same workspace without
//! being told the id again.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Marker filename at the workspace root.
pub const MARKER_FILENAME: &str = ".wid";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkspaceIdError {
    #[error("The workspace ID is empty")]
    Empty,

    #[error("The workspace ID should be a hexadecimal number, got '{0}'")]
    NotHex(String),
}

/// Trim, check and upper-case a workspace identifier.
pub fn validate_workspace_id(raw: &str) -> Result<String, WorkspaceIdError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(WorkspaceIdError::Empty);
    }
    if !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(WorkspaceIdError::NotHex(id.to_string()));
    }
    Ok(id.to_ascii_uppercase())
}

pub fn marker_path(root: &Path) -> PathBuf {
    root.join(MARKER_FILENAME)
}

/// Read and validate the marker, or `None` if it is missing or invalid.
pub async fn read_marker(root: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(marker_path(root)).await {
        Ok(content) => Ok(validate_workspace_id(&content).ok()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write the (already validated) identifier to the marker file.
pub async fn write_marker(root: &Path, workspace_id: &str) -> io::Result<()> {
    fs::write(marker_path(root), workspace_id.to_ascii_uppercase()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_validate_uppercases_and_trims() {
        assert_eq!(validate_workspace_id("  00ab12cd\n").unwrap(), "00AB12CD");
    }

    #[test]
    fn test_validate_rejects_non_hex() {
        assert_eq!(
            validate_workspace_id("xyz"),
            Err(WorkspaceIdError::NotHex("xyz".to_string()))
        );
        assert_eq!(validate_workspace_id("   "), Err(WorkspaceIdError::Empty));
    }

    #[tokio::test]
    async fn test_marker_round_trip() {
        let dir = tempdir().unwrap();
        assert_eq!(read_marker(dir.path()).await.unwrap(), None);

        write_marker(dir.path(), "beef01").await.unwrap();
        let raw = fs::read_to_string(dir.path().join(MARKER_FILENAME))
            .await
            .unwrap();
        assert_eq!(raw, "BEEF01");
        assert_eq!(
            read_marker(dir.path()).await.unwrap(),
            Some("BEEF01".to_string())
        );
    }

    #[tokio::test]
    async fn test_invalid_marker_is_ignored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MARKER_FILENAME), "not an id")
            .await
            .unwrap();
        assert_eq!(read_marker(dir.path()).await.unwrap(), None);
    }
}
