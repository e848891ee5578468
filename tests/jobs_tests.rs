//! Device programming jobs driven through the message handler.

#![cfg(unix)]

mod common;

use common::{record, Harness};
use serde_json::json;
use std::sync::Arc;
use workspace_sync::config::BoardConfig;
use workspace_sync::jobs::{JobSet, ProgramDeviceHandler};
use workspace_sync::sync::subjects::{BOARD_CONFIGURE, BOARD_PROGRESS};
use workspace_sync::sync::types::{Message, Severity};
use workspace_sync::sync::MessageHandler;

fn handler(h: &Harness, programmer: &str, jobs: Arc<JobSet>) -> ProgramDeviceHandler {
    ProgramDeviceHandler::new(
        h.root().to_path_buf(),
        BoardConfig {
            com_port: "/dev/ttyUSB0".to_string(),
            programmer: programmer.into(),
        },
        h.remote.clone(),
        h.offset.clone(),
        h.listener.clone(),
        jobs,
    )
}

fn configure(rel_path: &str) -> Message {
    let payload = serde_json::to_value(record(rel_path, "", Some(1000))).unwrap();
    Message::new(BOARD_CONFIGURE, Some("FileInfo"), payload, "web-client")
}

/// Progress kinds posted on the board subject, in order.
fn board_reports(h: &Harness) -> Vec<serde_json::Value> {
    h.remote
        .posts
        .lock()
        .unwrap()
        .iter()
        .filter(|(subject, _)| subject == BOARD_PROGRESS)
        .map(|(_, payload)| payload.clone())
        .collect()
}

#[tokio::test]
async fn successful_programming_reports_completion() {
    let h = Harness::new();
    h.write_local("top.bit", b"bits", 1000);
    let jobs = Arc::new(JobSet::new());

    handler(&h, "echo", jobs.clone())
        .handle(&configure("top.bit"))
        .await
        .unwrap();
    jobs.wait_idle().await;

    let reports = board_reports(&h);
    let kinds: Vec<_> = reports.iter().map(|r| r["type"].clone()).collect();
    assert_eq!(kinds, vec![json!("output"), json!("progress"), json!("done")]);
    assert_eq!(reports[1]["progress"], json!(1.0));
    assert_eq!(
        reports[1]["message"],
        json!("FPGA configuration succeeded!")
    );
    // The working directory is stripped from tool output.
    let output = reports[0]["message"].as_str().unwrap();
    assert!(output.contains("-prg /top.bit"), "output was {}", output);
}

#[tokio::test]
async fn failing_programmer_reports_exit_code() {
    let h = Harness::new();
    h.write_local("top.bit", b"bits", 1000);
    let jobs = Arc::new(JobSet::new());

    handler(&h, "false", jobs.clone())
        .handle(&configure("top.bit"))
        .await
        .unwrap();
    jobs.wait_idle().await;

    let reports = board_reports(&h);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["type"], json!("error"));
    assert!(reports[0]["message"]
        .as_str()
        .unwrap()
        .contains("exit code was: Some(1)"));
}

#[tokio::test]
async fn missing_file_is_logged_and_nothing_runs() {
    let h = Harness::new();
    let jobs = Arc::new(JobSet::new());

    handler(&h, "echo", jobs.clone())
        .handle(&configure("missing.bit"))
        .await
        .unwrap();
    jobs.wait_idle().await;

    assert!(board_reports(&h).is_empty());
    let errors = h.listener.logs_at(Severity::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("missing.bit"));
}

#[tokio::test]
async fn malformed_request_is_rejected() {
    let h = Harness::new();
    let jobs = Arc::new(JobSet::new());
    let message = Message::new(BOARD_CONFIGURE, None, json!(42), "web-client");

    assert!(handler(&h, "echo", jobs.clone())
        .handle(&message)
        .await
        .is_err());
    assert_eq!(jobs.len().await, 0);
}
