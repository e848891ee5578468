//! A synthesis request runs a script tool and publishes its artifacts.

#![cfg(unix)]

mod common;

use common::Harness;
use serde_json::json;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;
use workspace_sync::jobs::{BuildRequestHandler, JobSet, ScriptTool, ToolRegistry};
use workspace_sync::sync::handlers::build_routing_table;
use workspace_sync::sync::subjects::{COMPILER_SYNTHESIS, SYNTHESIS_PROGRESS, SYNTHESIS_RUN};
use workspace_sync::sync::types::Message;
use workspace_sync::sync::MessageHandler;
use workspace_sync::Capabilities;

const SCRIPT: &str = "#!/bin/sh\necho '#!>Synthesizing'\necho \"$@\" > top.bit\n";

#[tokio::test]
async fn synthesis_uploads_artifacts_and_posts_result() {
    let h = Harness::new();
    h.write_local(
        "settings.json",
        br#"{"board": "boards/pico.json", "topModule": "top"}"#,
        1000,
    );
    h.write_local(
        "boards/pico.json",
        br#"{"fpga": {"vendor": "Lattice"}}"#,
        1000,
    );
    h.write_local("top.vhdl", b"entity top", 1000);

    let script = h.root().join("synth.sh");
    std::fs::write(&script, SCRIPT).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(ScriptTool::new("Lattice", &script)));
    let jobs = Arc::new(JobSet::new());
    let handler = BuildRequestHandler::new(
        h.root().to_path_buf(),
        tools,
        Duration::from_secs(30),
        1,
        h.remote.clone(),
        h.offset.clone(),
        h.listener.clone(),
        jobs.clone(),
    );

    let request = Message::new(SYNTHESIS_RUN, None, json!("settings.json"), "web-client");
    handler.handle(&request).await.unwrap();
    jobs.wait_idle().await;

    assert!(h.root().join("src-gen/synthesis/top.bit").exists());
    let derived = h.remote.derived_uploads.lock().unwrap().clone();
    assert_eq!(derived.len(), 1);
    assert_eq!(derived[0].0, "src-gen/synthesis/top.bit");
    assert_eq!(derived[0].2, "settings.json");

    let subjects = h.remote.posted_subjects();
    assert_eq!(subjects.first().map(String::as_str), Some(SYNTHESIS_PROGRESS));
    assert_eq!(subjects.last().map(String::as_str), Some(COMPILER_SYNTHESIS));

    let posts = h.remote.posts.lock().unwrap();
    let (_, result) = posts.last().unwrap();
    assert_eq!(result[0]["creator"], json!("Synthesis"));
    assert_eq!(
        result[0]["files"][0]["relPath"],
        json!("src-gen/synthesis/top.bit")
    );
}

#[tokio::test]
async fn synthesis_is_routed_only_when_a_tool_can_run() {
    let h = Harness::new();
    let mut missing = Capabilities::default();
    missing
        .tools
        .register(Arc::new(ScriptTool::new("Lattice", h.root().join("no-such-tool"))));
    let (table, _) = build_routing_table(h.engine.clone(), &missing, Arc::new(JobSet::new()));
    assert!(table.get(SYNTHESIS_RUN).is_none());

    let script = h.root().join("synth.sh");
    std::fs::write(&script, SCRIPT).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    let mut present = Capabilities::default();
    present
        .tools
        .register(Arc::new(ScriptTool::new("Lattice", &script)));
    let (table, _) = build_routing_table(h.engine.clone(), &present, Arc::new(JobSet::new()));
    assert!(table.get(SYNTHESIS_RUN).is_some());
}
