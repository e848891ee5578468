//! Data types exchanged with the server and reported to listeners.
//!
//! Wire field names follow the server's camelCase schema. Timestamps are
//! milliseconds since the Unix epoch; a zero or missing value on the wire
//! means "unknown" and decodes to `None`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash, timestamp and location of one versioned file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the workspace root, always with `/` separators
    #[serde(rename = "relPath")]
    pub rel_path: String,
    /// SHA-1 of the file bytes, hex encoded
    #[serde(rename = "hash")]
    pub content_hash: String,
    /// Remote modification time, `None` when the server did not say
    #[serde(rename = "lastModified", default, with = "optional_millis")]
    pub last_modified: Option<i64>,
    /// Where to fetch the bytes: relative to the workspace, or an absolute server path
    #[serde(rename = "fileURI", default)]
    pub source_uri: String,
}

impl FileRecord {
    /// Location to download from, falling back to the relative path.
    pub fn download_source(&self) -> &str {
        if self.source_uri.is_empty() {
            &self.rel_path
        } else {
            &self.source_uri
        }
    }
}

/// Result of a build job. Its outputs are tracked like any other file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileInfo {
    #[serde(rename = "createdAt", default, with = "optional_millis")]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub creator: String,
    #[serde(rename = "files", default)]
    pub outputs: Vec<FileRecord>,
}

impl CompileInfo {
    pub fn new(creator: impl Into<String>) -> Self {
        Self {
            created_at: Some(chrono::Utc::now().timestamp_millis()),
            creator: creator.into(),
            outputs: Vec::new(),
        }
    }
}

/// One manifest entry: a file plus any build result attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub record: FileRecord,
    #[serde(rename = "info", default, skip_serializing_if = "Option::is_none")]
    pub build_result: Option<CompileInfo>,
}

impl FileEntry {
    pub fn new(record: FileRecord) -> Self {
        Self {
            record,
            build_result: None,
        }
    }

    pub fn rel_path(&self) -> &str {
        &self.record.rel_path
    }

    /// Output records that must go away together with this entry.
    pub fn cascade_outputs(&self) -> &[FileRecord] {
        self.build_result
            .as_ref()
            .map(|info| info.outputs.as_slice())
            .unwrap_or_default()
    }
}

/// Full manifest snapshot as served by the workspace endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoInfo {
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// Envelope for every message on the push stream and every posted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Colon-separated hierarchical subject, e.g. `work:updated`
    pub subject: String,
    #[serde(rename = "type", default)]
    pub payload_type: Option<String>,
    #[serde(rename = "contents", default)]
    pub payload: serde_json::Value,
    #[serde(rename = "clientID", default)]
    pub origin_client_id: String,
}

impl Message {
    pub fn new(
        subject: impl Into<String>,
        payload_type: Option<&str>,
        payload: serde_json::Value,
        origin_client_id: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload_type: payload_type.map(str::to_string),
            payload,
            origin_client_id: origin_client_id.into(),
        }
    }

    /// Decode the opaque payload into the shape a handler expects.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// Kind of a build-job progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Progress,
    Error,
    Output,
    Done,
}

impl fmt::Display for ProgressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgressKind::Progress => "progress",
            ProgressKind::Error => "error",
            ProgressKind::Output => "output",
            ProgressKind::Done => "done",
        };
        f.write_str(s)
    }
}

/// Progress report posted while a build job runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressFeedback {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    /// Fraction in `0..=1`, or `None` for errors and raw output
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(rename = "timeStamp")]
    pub timestamp: i64,
    #[serde(default)]
    pub message: Option<String>,
}

impl ProgressFeedback {
    pub fn new(kind: ProgressKind, progress: Option<f64>, message: Option<String>) -> Self {
        Self {
            kind,
            progress,
            timestamp: chrono::Utc::now().timestamp_millis(),
            message,
        }
    }
}

/// Connection lifecycle reported to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Closed,
    Reconnect,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "CONNECTING",
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Closed => "CLOSED",
            ConnectionStatus::Reconnect => "RECONNECT",
            ConnectionStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Completed operation on a local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Added,
    Updated,
    Removed,
    Uploaded,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileOp::Added => "ADDED",
            FileOp::Updated => "UPDATED",
            FileOp::Removed => "REMOVED",
            FileOp::Uploaded => "UPLOADED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Millisecond timestamps where `0` on the wire means "unknown".
mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.unwrap_or(0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        let raw = Option::<i64>::deserialize(deserializer)?;
        Ok(raw.filter(|ms| *ms != 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_record_wire_names() {
        let record: FileRecord = serde_json::from_value(json!({
            "relPath": "src/a.vhdl",
            "hash": "abc",
            "lastModified": 1000,
            "fileURI": "/files/a.vhdl"
        }))
        .unwrap();
        assert_eq!(record.rel_path, "src/a.vhdl");
        assert_eq!(record.content_hash, "abc");
        assert_eq!(record.last_modified, Some(1000));
        assert_eq!(record.source_uri, "/files/a.vhdl");
    }

    #[test]
    fn test_zero_timestamp_is_unknown() {
        let record: FileRecord =
            serde_json::from_value(json!({"relPath": "a", "hash": "h", "lastModified": 0}))
                .unwrap();
        assert_eq!(record.last_modified, None);

        let missing: FileRecord =
            serde_json::from_value(json!({"relPath": "a", "hash": "h"})).unwrap();
        assert_eq!(missing.last_modified, None);
        assert_eq!(missing.download_source(), "a");
    }

    #[test]
    fn test_file_entry_with_build_result() {
        let entry: FileEntry = serde_json::from_value(json!({
            "record": {"relPath": "top.pshdl", "hash": "h1", "lastModified": 5},
            "info": {
                "createdAt": 7,
                "creator": "Synthesis",
                "files": [{"relPath": "src-gen/top.vhdl", "hash": "h2", "lastModified": 6}]
            }
        }))
        .unwrap();
        assert_eq!(entry.rel_path(), "top.pshdl");
        assert_eq!(entry.cascade_outputs().len(), 1);
        assert_eq!(entry.cascade_outputs()[0].rel_path, "src-gen/top.vhdl");

        let plain = FileEntry::new(entry.record.clone());
        assert!(plain.cascade_outputs().is_empty());
    }

    #[test]
    fn test_message_decode_payload() {
        let msg: Message = serde_json::from_value(json!({
            "subject": "work:deleted",
            "type": "FileInfo",
            "contents": {"record": {"relPath": "a.vhdl", "hash": "h"}},
            "clientID": "c1"
        }))
        .unwrap();
        assert_eq!(msg.origin_client_id, "c1");
        let entry: FileEntry = msg.decode_payload().unwrap();
        assert_eq!(entry.rel_path(), "a.vhdl");
        assert!(msg.decode_payload::<Vec<FileEntry>>().is_err());
    }

    #[test]
    fn test_progress_feedback_serializes_lowercase_kind() {
        let feedback = ProgressFeedback::new(ProgressKind::Done, None, None);
        let value = serde_json::to_value(&feedback).unwrap();
        assert_eq!(value["type"], "done");
        assert!(value["timeStamp"].as_i64().unwrap() > 0);
    }
}
