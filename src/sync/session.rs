//! Connection lifecycle for one workspace.
//!
//! A connect attempt runs: client ID, clock estimate, manifest snapshot,
//! reconciliation, push stream. Once the stream opens the session is
//! CONNECTED, the watcher starts and services are announced. A failure at
//! any step reports ERROR and, within the reconnect policy, starts over.

use crate::config::SyncConfig;
use crate::jobs::JobSet;
use crate::sync::clock::{ClockOffset, ClockSync};
use crate::sync::engine::SyncEngine;
use crate::sync::handlers::{build_routing_table, ServiceAdvertiser};
use crate::sync::listener::WorkspaceListener;
use crate::sync::manifest::Manifest;
use crate::sync::marker::write_marker;
use crate::sync::router::EventRouter;
use crate::sync::transport::{open_push_stream, pump_events, HttpTransport, TransportError};
use crate::sync::types::{ConnectionStatus, Severity};
use crate::sync::watcher::{FileWatcher, WatcherHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct WorkspaceSession {
    config: SyncConfig,
    listener: Arc<dyn WorkspaceListener>,
    transport: Arc<HttpTransport>,
    engine: Arc<SyncEngine>,
    router: Arc<EventRouter>,
    advertiser: Arc<ServiceAdvertiser>,
    jobs: Arc<JobSet>,
    watcher: Mutex<Option<WatcherHandle>>,
    /// Set once the push stream opened during the current attempt
    connected: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl WorkspaceSession {
    pub fn new(config: SyncConfig, listener: Arc<dyn WorkspaceListener>) -> Arc<Self> {
        let transport = Arc::new(HttpTransport::new(
            config.server_url.clone(),
            &config.workspace_id,
        ));
        let engine = Arc::new(SyncEngine::new(
            config.root.clone(),
            Arc::new(Manifest::new()),
            transport.clone(),
            Arc::new(ClockOffset::default()),
            listener.clone(),
        ));
        let jobs = Arc::new(JobSet::new());
        let (table, advertiser) =
            build_routing_table(engine.clone(), &config.capabilities, jobs.clone());
        debug!("Routing table: {:?}", table.prefixes());
        let router = Arc::new(EventRouter::new(table, listener.clone()));
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            config,
            listener,
            transport,
            engine,
            router,
            advertiser,
            jobs,
            watcher: Mutex::new(None),
            connected: AtomicBool::new(false),
            shutdown,
        })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn transport(&self) -> &Arc<HttpTransport> {
        &self.transport
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Connect in the background. The task ends when the session is closed
    /// or reconnect attempts run out.
    pub fn start(self: &Arc<Self>) -> JoinHandle<Result<(), SessionError>> {
        let session = self.clone();
        tokio::spawn(async move { session.run().await })
    }

    async fn run(self: Arc<Self>) -> Result<(), SessionError> {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                result = self.connect_once() => result,
                _ = self.closed() => return Ok(()),
            };
            let Err(e) = result else {
                return Ok(());
            };
            if self.is_closed() {
                return Ok(());
            }

            self.stop_watcher().await;
            self.listener.log_error(&e);
            self.listener.connection_status(ConnectionStatus::Error);

            if self.connected.swap(false, Ordering::SeqCst) {
                attempt = 0;
            }
            attempt += 1;
            let Some(delay) = self.config.reconnect.delay(attempt) else {
                return Err(e);
            };
            info!("Reconnecting in {:?} (attempt {})", delay, attempt);
            self.listener.connection_status(ConnectionStatus::Reconnect);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.closed() => return Ok(()),
            }
        }
    }

    async fn connect_once(self: &Arc<Self>) -> Result<(), SessionError> {
        self.listener.connection_status(ConnectionStatus::Connecting);
        tokio::fs::create_dir_all(&self.config.root).await?;
        write_marker(&self.config.root, &self.config.workspace_id).await?;

        self.transport.fetch_client_id().await?;
        ClockSync::new(self.engine.offset().clone(), self.listener.clone())
            .estimate(&*self.transport)
            .await?;

        let repo = self.transport.fetch_snapshot().await?;
        let failures = self.engine.apply_snapshot(&repo).await;
        if failures > 0 {
            self.listener.log(
                Severity::Warning,
                &format!("{} of {} files failed to synchronize", failures, repo.files.len()),
            );
        }

        let stream = open_push_stream(&self.transport)?;
        let session = self.clone();
        let on_open = move || {
            let session = session.clone();
            tokio::spawn(async move { session.on_connected().await });
        };
        pump_events(stream, &self.router, &*self.listener, on_open).await?;
        Ok(())
    }

    async fn on_connected(&self) {
        if self.is_closed() {
            return;
        }
        self.connected.store(true, Ordering::SeqCst);
        self.listener.connection_status(ConnectionStatus::Connected);

        {
            let mut slot = self.watcher.lock().await;
            if slot.is_none() && !self.is_closed() {
                let watcher = FileWatcher::new(self.engine.clone(), self.config.watch.clone());
                *slot = Some(watcher.spawn());
            }
        }

        if let Err(e) = self.advertiser.announce().await {
            self.listener.log_error(&e);
        }
    }

    async fn stop_watcher(&self) {
        let handle = self.watcher.lock().await.take();
        if let Some(handle) = handle {
            handle.join().await;
        }
    }

    /// Stop the watcher and build jobs, drop the push stream and report
    /// CLOSED.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        self.stop_watcher().await;
        self.jobs.shutdown().await;
        self.listener.connection_status(ConnectionStatus::Closed);
    }
}
