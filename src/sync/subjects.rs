//! Message subjects consumed and produced by the sync client.
//!
//! Subjects are colon-separated; a handler registered for a prefix receives
//! every message beneath it.

pub const WORK_ADDED: &str = "work:added";
pub const WORK_UPDATED: &str = "work:updated";
pub const WORK_DELETED: &str = "work:deleted";
pub const WORK_CREATED_WORKSPACE: &str = "work:createdWorkspace";

pub const COMPILER: &str = "compiler";
pub const COMPILER_SYNTHESIS: &str = "compiler:synthesis";

pub const CLIENT_CONNECTED: &str = "client:connected";

pub const SERVICE_DISCOVER: &str = "service:discover";
pub const SYNTHESIS_AVAILABLE: &str = "service:synthesis:available";
pub const SYNTHESIS_RUN: &str = "service:synthesis:run";
pub const SYNTHESIS_PROGRESS: &str = "service:synthesis:progress";
pub const BOARD_AVAILABLE: &str = "service:board:available";
pub const BOARD_CONFIGURE: &str = "service:board:configure";
pub const BOARD_PROGRESS: &str = "service:board:progress";

/// Separator between subject segments.
pub const SEPARATOR: char = ':';

/// Every prefix of a subject, coarse to fine: `a:b:c` yields `a`, `a:b`, `a:b:c`.
pub fn prefixes(subject: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::with_capacity(subject.len());
    for (i, segment) in subject.split(SEPARATOR).enumerate() {
        if i > 0 {
            current.push(SEPARATOR);
        }
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}
