//! URL building utilities for the workspace endpoints.
//!
//! Workspace identifiers are always upper-cased in URLs. Relative paths are
//! encoded segment by segment so `/` separators survive.

use crate::API_PREFIX;

/// URL-encode a path for use in URL paths, keeping `/` separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize a path to use forward slashes regardless of OS.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

fn base(server: &str) -> &str {
    server.trim_end_matches('/')
}

/// Build URL for the workspace resource (manifest, uploads).
pub fn build_workspace_url(server: &str, workspace_id: &str) -> String {
    format!(
        "{}{}/workspace/{}",
        base(server),
        API_PREFIX,
        workspace_id.to_ascii_uppercase()
    )
}

/// Build URL for the streaming side of the workspace (messages, push).
pub fn build_streaming_url(server: &str, workspace_id: &str) -> String {
    format!(
        "{}{}/streaming/workspace/{}",
        base(server),
        API_PREFIX,
        workspace_id.to_ascii_uppercase()
    )
}

pub fn build_client_id_url(server: &str, workspace_id: &str) -> String {
    format!("{}/clientID", build_streaming_url(server, workspace_id))
}

/// Build URL for posting a message as `client_id`
pub fn build_message_url(server: &str, workspace_id: &str, client_id: &str) -> String {
    format!(
        "{}/{}",
        build_streaming_url(server, workspace_id),
        urlencoding::encode(client_id)
    )
}

/// Build URL for the server-push subscription of `client_id`
pub fn build_push_url(server: &str, workspace_id: &str, client_id: &str) -> String {
    format!("{}/sse", build_message_url(server, workspace_id, client_id))
}

pub fn build_delete_url(server: &str, workspace_id: &str, rel_path: &str) -> String {
    format!(
        "{}/delete/{}",
        build_workspace_url(server, workspace_id),
        encode_path(rel_path)
    )
}

/// Build URL for downloading file bytes.
///
/// A source starting with `/` is an absolute server path; anything else is
/// relative to the workspace.
pub fn build_download_url(server: &str, workspace_id: &str, source: &str) -> String {
    if source.starts_with('/') {
        format!("{}{}?plain=true", base(server), encode_path(source))
    } else {
        format!(
            "{}/{}?plain=true",
            build_workspace_url(server, workspace_id),
            encode_path(source)
        )
    }
}

pub fn build_server_time_url(server: &str) -> String {
    format!("{}/serverTime", base(server))
}
