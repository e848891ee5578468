//! Hierarchical dispatch of push messages to handlers.
//!
//! A handler registered for `work` receives `work:added`, `work:updated`
//! and `work:deleted`; a handler registered for `work:updated` receives only
//! that subject. For one message, handlers run coarse to fine.

use crate::sync::listener::WorkspaceListener;
use crate::sync::subjects::prefixes;
use crate::sync::types::{Message, Severity};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Could not decode {subject} payload ({source}): {raw}")]
    Payload {
        subject: String,
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Sync failed: {0}")]
    Sync(#[from] crate::sync::engine::SyncError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::sync::transport::TransportError),

    #[error("{0}")]
    Other(String),
}

impl HandlerError {
    /// Payload decode failure that keeps the raw JSON for diagnosis.
    pub fn payload(message: &Message, source: serde_json::Error) -> Self {
        HandlerError::Payload {
            subject: message.subject.clone(),
            raw: message.payload.to_string(),
            source,
        }
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Immutable subject-prefix to handler table.
#[derive(Default, Clone)]
pub struct RoutingTable {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `prefix`, replacing any previous handler.
    pub fn with(mut self, prefix: &str, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(prefix.to_string(), handler);
        self
    }

    pub fn insert(&mut self, prefix: &str, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(prefix.to_string(), handler);
    }

    pub fn get(&self, prefix: &str) -> Option<&Arc<dyn MessageHandler>> {
        self.handlers.get(prefix)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn prefixes(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Dispatcher reading whichever table is current.
///
/// Tables are swapped whole; a dispatch in progress keeps the table it
/// started with. Handler failures are reported to the listener.
pub struct EventRouter {
    table: RwLock<Arc<RoutingTable>>,
    listener: Arc<dyn WorkspaceListener>,
}

impl EventRouter {
    pub fn new(table: RoutingTable, listener: Arc<dyn WorkspaceListener>) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
            listener,
        }
    }

    pub fn replace(&self, table: RoutingTable) {
        match self.table.write() {
            Ok(mut current) => *current = Arc::new(table),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(table),
        }
    }

    pub fn table(&self) -> Arc<RoutingTable> {
        match self.table.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Handlers matching `subject`, coarse to fine.
    pub fn handlers_for(&self, subject: &str) -> Vec<(String, Arc<dyn MessageHandler>)> {
        let table = self.table();
        prefixes(subject)
            .into_iter()
            .filter_map(|prefix| {
                let handler = table.get(&prefix)?.clone();
                Some((prefix, handler))
            })
            .collect()
    }

    /// Run every matching handler. Returns how many ran successfully.
    ///
    /// A handler that fails or panics is reported at ERROR; the remaining
    /// handlers still run.
    pub async fn dispatch(&self, message: &Message) -> usize {
        let handlers = self.handlers_for(&message.subject);
        if handlers.is_empty() {
            debug!("No handler for subject {}", message.subject);
            return 0;
        }

        let mut succeeded = 0;
        for (prefix, handler) in handlers {
            match AssertUnwindSafe(handler.handle(message))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => self.listener.log(
                    Severity::Error,
                    &format!("Handler {} failed for {}: {}", prefix, message.subject, e),
                ),
                Err(_) => self.listener.log(
                    Severity::Error,
                    &format!("Handler {} panicked on {}", prefix, message.subject),
                ),
            }
        }
        succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::listener::TracingListener;
    use crate::sync::types::{ConnectionStatus, FileOp};
    use serde_json::Value;
    use std::path::Path;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, message.subject));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl MessageHandler for Failing {
        async fn handle(&self, _message: &Message) -> Result<(), HandlerError> {
            Err(HandlerError::Other("nope".to_string()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl MessageHandler for Panicking {
        async fn handle(&self, _message: &Message) -> Result<(), HandlerError> {
            panic!("handler blew up");
        }
    }

    #[derive(Default)]
    struct ErrorLog(Mutex<Vec<String>>);

    impl WorkspaceListener for ErrorLog {
        fn connection_status(&self, _status: ConnectionStatus) {}

        fn log(&self, severity: Severity, message: &str) {
            if severity == Severity::Error {
                self.0.lock().unwrap().push(message.to_string());
            }
        }

        fn incoming_message(&self, _message: &Message) {}

        fn file_operation(&self, _op: FileOp, _local_file: &Path) {}
    }

    struct BadPayload;

    #[async_trait]
    impl MessageHandler for BadPayload {
        async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
            let _: Vec<String> = serde_json::from_value(message.payload.clone())
                .map_err(|e| HandlerError::payload(message, e))?;
            Ok(())
        }
    }

    fn router(table: RoutingTable) -> EventRouter {
        EventRouter::new(table, Arc::new(TracingListener))
    }

    fn message(subject: &str) -> Message {
        Message::new(subject, None, Value::Null, "c1")
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn MessageHandler> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
        })
    }

    #[tokio::test]
    async fn test_prefix_law() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = router(
            RoutingTable::new()
                .with("work:updated", recorder("fine", &log))
                .with("work", recorder("coarse", &log))
                .with("work:deleted", recorder("other", &log)),
        );

        assert_eq!(router.dispatch(&message("work:updated")).await, 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["coarse:work:updated", "fine:work:updated"]
        );
    }

    #[tokio::test]
    async fn test_unmatched_subject_runs_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = router(RoutingTable::new().with("work:added", recorder("a", &log)));
        assert_eq!(router.dispatch(&message("work")).await, 0);
        assert_eq!(router.dispatch(&message("workspace:added")).await, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_siblings() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = router(
            RoutingTable::new()
                .with("work", Arc::new(Failing))
                .with("work:added", recorder("fine", &log)),
        );
        assert_eq!(router.dispatch(&message("work:added")).await, 1);
        assert_eq!(*log.lock().unwrap(), vec!["fine:work:added"]);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = router(
            RoutingTable::new()
                .with("compiler", Arc::new(Panicking))
                .with("compiler:synthesis", recorder("fine", &log)),
        );
        assert_eq!(router.dispatch(&message("compiler:synthesis")).await, 1);
        // The next message is still delivered.
        assert_eq!(router.dispatch(&message("compiler:synthesis")).await, 1);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_replace_swaps_table() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = router(RoutingTable::new());
        assert_eq!(router.dispatch(&message("service:discover")).await, 0);

        router.replace(RoutingTable::new().with("service", recorder("svc", &log)));
        assert_eq!(router.dispatch(&message("service:discover")).await, 1);
        assert_eq!(router.table().prefixes(), vec!["service"]);
    }

    #[tokio::test]
    async fn test_failures_reach_listener() {
        let errors = Arc::new(ErrorLog::default());
        let router = EventRouter::new(
            RoutingTable::new()
                .with("work", Arc::new(BadPayload))
                .with("work:added", Arc::new(Panicking)),
            errors.clone(),
        );
        let bad = Message::new("work:added", None, serde_json::json!({"relPath": 7}), "c1");

        assert_eq!(router.dispatch(&bad).await, 0);
        let logged = errors.0.lock().unwrap().clone();
        assert_eq!(logged.len(), 2);
        assert!(logged[0].contains("work:added"), "logged {:?}", logged);
        assert!(logged[0].contains("relPath"), "logged {:?}", logged);
        assert!(logged[1].contains("panicked"), "logged {:?}", logged);
    }
}
