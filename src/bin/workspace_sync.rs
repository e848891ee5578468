//! workspace-sync: keep a local directory in sync with a remote workspace.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use workspace_sync::cli::Args;
use workspace_sync::sync::TracingListener;
use workspace_sync::WorkspaceSession;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = match args.into_config().await {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(1);
        }
    };
    if let Err(e) = tokio::fs::create_dir_all(&config.root).await {
        error!("Cannot create {}: {}", config.root.display(), e);
        return ExitCode::from(1);
    }

    info!(
        "Syncing workspace {} into {} via {}",
        config.workspace_id,
        config.root.display(),
        config.server_url
    );
    let session = WorkspaceSession::new(config, Arc::new(TracingListener));
    let mut task = session.start();

    let code = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            ExitCode::SUCCESS
        }
        result = &mut task => match result {
            Ok(Ok(())) => ExitCode::SUCCESS,
            Ok(Err(e)) => {
                error!("Giving up: {}", e);
                ExitCode::from(2)
            }
            Err(e) => {
                error!("Session task failed: {}", e);
                ExitCode::from(2)
            }
        },
    };

    session.close().await;
    if !task.is_finished() {
        let _ = task.await;
    }
    info!("Goodbye!");
    code
}
