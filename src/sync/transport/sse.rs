//! Server-Sent Events (SSE) push subscription.
//!
//! Every event on the stream carries one JSON [`Message`]. Messages are
//! dispatched strictly in arrival order; a malformed event is reported and
//! skipped without closing the stream.

use super::urls::build_push_url;
use super::{HttpTransport, TransportError};
use crate::sync::listener::WorkspaceListener;
use crate::sync::router::EventRouter;
use crate::sync::types::{ConnectionStatus, Message, Severity};
use futures::StreamExt;
use reqwest_eventsource::{Event as SseEvent, EventSource};
use tracing::{debug, info};

/// Open the push subscription for the transport's current client ID.
pub fn open_push_stream(transport: &HttpTransport) -> Result<EventSource, TransportError> {
    let client_id = transport.client_id().ok_or(TransportError::NotConnected)?;
    let url = build_push_url(transport.server(), transport.workspace_id(), &client_id);
    info!("Connecting to SSE: {}", url);
    let request = transport
        .http()
        .get(&url)
        .header("accept", "text/event-stream");
    EventSource::new(request).map_err(|e| TransportError::Stream(e.to_string()))
}

/// Deliver events until the stream fails or ends.
///
/// `on_open` runs each time the underlying connection opens. The function
/// only returns with an error: a push stream that ends is a lost connection.
pub async fn pump_events(
    mut es: EventSource,
    router: &EventRouter,
    listener: &dyn WorkspaceListener,
    mut on_open: impl FnMut(),
) -> Result<(), TransportError> {
    while let Some(event) = es.next().await {
        match event {
            Ok(SseEvent::Open) => {
                info!("SSE connection opened");
                on_open();
            }
            Ok(SseEvent::Message(msg)) => {
                if msg.data.trim().is_empty() {
                    continue;
                }
                debug!("SSE event: {} - {}", msg.event, msg.data);
                match serde_json::from_str::<Message>(&msg.data) {
                    Ok(message) => {
                        listener.incoming_message(&message);
                        router.dispatch(&message).await;
                    }
                    Err(e) => {
                        listener.log(
                            Severity::Error,
                            &format!("Failed to parse push event ({}): {}", e, msg.data),
                        );
                        listener.connection_status(ConnectionStatus::Error);
                    }
                }
            }
            Err(e) => {
                es.close();
                return Err(TransportError::Stream(e.to_string()));
            }
        }
    }
    Err(TransportError::Stream("push stream ended".to_string()))
}
