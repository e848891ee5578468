//! Workspace synchronization: transport, clock estimation, manifest,
//! conflict resolution, local change detection and event dispatch.

pub mod clock;
pub mod engine;
pub mod file_times;
pub mod handlers;
pub mod hash;
pub mod listener;
pub mod manifest;
pub mod marker;
pub mod router;
pub mod session;
pub mod subjects;
pub mod transport;
pub mod types;
pub mod watcher;

pub use clock::{select_sample, ClockOffset, ClockSample, ClockSync, TimeSource};
pub use engine::{
    plan_resolution, LocalCheck, LocalState, Resolution, ResolutionPlan, SyncEngine, SyncError,
};
pub use hash::{compute_content_hash, compute_file_hash, hashes_match};
pub use listener::{TracingListener, WorkspaceListener};
pub use manifest::Manifest;
pub use marker::{
    read_marker, validate_workspace_id, write_marker, WorkspaceIdError, MARKER_FILENAME,
};
pub use router::{EventRouter, HandlerError, MessageHandler, RoutingTable};
pub use transport::{HttpTransport, Remote, TransportError};
pub use types::{
    CompileInfo, ConnectionStatus, FileEntry, FileOp, FileRecord, Message, ProgressFeedback,
    ProgressKind, RepoInfo, Severity,
};
pub use watcher::{FileWatcher, TreeScan, WatchOptions, WatcherHandle};
