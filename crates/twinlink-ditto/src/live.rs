//! Ditto live channel over WebSocket.
//!
//! Property updates are sent as Ditto protocol `modify` commands with
//! `response-required`. A reader task matches responses to pending publishes
//! by correlation id. A publish left unanswered past its deadline completes
//! with [`PublishError::Timeout`]. When the socket closes every pending publish
//! completes with [`PublishError::ConnectionClosed`], and later publishes fail
//! right away. There is no reconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use twinlink_core::config::PUBLISH_TIMEOUT;
use twinlink_core::{
    PropertyPath, PropertyPublisher, PropertyValue, PublishCompleter, PublishError,
    PublishHandle, PublishOutcome, TwinIdentity,
};
use uuid::Uuid;

use crate::protocol::{self, CommandResponse};
use crate::Credentials;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How often the reader task looks for overdue publishes.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Errors opening the live channel.
#[derive(Debug, Error)]
pub enum LiveClientError {
    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    Connection(String),
}

/// Publishes property updates over the Ditto live channel.
pub struct DittoPublisher {
    feature_id: String,
    response_timeout: Duration,
    outbound: mpsc::UnboundedSender<Outbound>,
    shared: Arc<Shared>,
}

struct Outbound {
    correlation_id: String,
    text: String,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
    closed: bool,
    completers: HashMap<String, PendingPublish>,
}

struct PendingPublish {
    completer: PublishCompleter,
    deadline: Instant,
    timeout: Duration,
}

impl Shared {
    /// Track a publish until a response arrives or `timeout` passes. Hands the
    /// completer back if the channel is closed.
    fn register(
        &self,
        correlation_id: String,
        completer: PublishCompleter,
        timeout: Duration,
    ) -> Result<(), PublishCompleter> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(completer);
        }
        pending.completers.insert(
            correlation_id,
            PendingPublish {
                completer,
                deadline: Instant::now() + timeout,
                timeout,
            },
        );
        Ok(())
    }

    fn complete(&self, correlation_id: &str, outcome: PublishOutcome) -> bool {
        let entry = self.pending.lock().completers.remove(correlation_id);
        match entry {
            Some(entry) => {
                entry.completer.complete(outcome);
                true
            }
            None => false,
        }
    }

    /// Fail every publish whose deadline is not after `now`.
    fn expire(&self, now: Instant) {
        let expired: Vec<_> = {
            let mut pending = self.pending.lock();
            let overdue: Vec<String> = pending
                .completers
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            overdue
                .into_iter()
                .filter_map(|id| pending.completers.remove(&id).map(|entry| (id, entry)))
                .collect()
        };
        for (correlation_id, entry) in expired {
            debug!(%correlation_id, "No response to modify command in time");
            let millis = u64::try_from(entry.timeout.as_millis()).unwrap_or(u64::MAX);
            entry.completer.complete(Err(PublishError::Timeout(millis)));
        }
    }

    fn close(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.completers.drain().collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "Failing pending publishes");
        }
        for (_, entry) in drained {
            entry.completer.complete(Err(PublishError::ConnectionClosed));
        }
    }

    fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    fn pending_count(&self) -> usize {
        self.pending.lock().completers.len()
    }
}

impl DittoPublisher {
    /// Open the live channel at `ws_url` (e.g. `wss://host/ws/2`).
    ///
    /// `feature_id` is the feature whose properties are modified.
    pub async fn connect(
        ws_url: &str,
        credentials: &Credentials,
        feature_id: impl Into<String>,
    ) -> Result<Self, LiveClientError> {
        let mut request = ws_url
            .into_client_request()
            .map_err(|e| LiveClientError::InvalidUrl(format!("{ws_url}: {e}")))?;
        let auth = HeaderValue::from_str(&credentials.basic_auth_header())
            .map_err(|e| LiveClientError::Connection(format!("bad credentials: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| LiveClientError::Connection(format!("{ws_url}: {e}")))?;
        info!(url = %ws_url, "Live channel connected");

        let (sink, source) = stream.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        tokio::spawn(write_loop(sink, outbound_rx, shared.clone()));
        tokio::spawn(read_loop(source, shared.clone()));

        Ok(Self {
            feature_id: feature_id.into(),
            response_timeout: PUBLISH_TIMEOUT,
            outbound,
            shared,
        })
    }

    /// Set how long a publish waits for its response.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn feature_id(&self) -> &str {
        &self.feature_id
    }

    /// Whether the socket has closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Publishes still waiting for a response.
    pub fn pending(&self) -> usize {
        self.shared.pending_count()
    }
}

impl PropertyPublisher for DittoPublisher {
    fn publish(
        &self,
        twin: &TwinIdentity,
        path: &PropertyPath,
        value: PropertyValue,
    ) -> PublishHandle {
        let correlation_id = Uuid::new_v4().to_string();
        let command =
            protocol::modify_property(twin, &self.feature_id, path, value, &correlation_id);

        let (completer, handle) = PublishHandle::pending();
        if let Err(completer) =
            self.shared
                .register(correlation_id.clone(), completer, self.response_timeout)
        {
            completer.complete(Err(PublishError::ConnectionClosed));
            return handle;
        }

        let outbound = Outbound {
            correlation_id,
            text: command.to_string(),
        };
        if let Err(mpsc::error::SendError(outbound)) = self.outbound.send(outbound) {
            self.shared
                .complete(&outbound.correlation_id, Err(PublishError::ConnectionClosed));
        }
        handle
    }
}

impl Drop for DittoPublisher {
    fn drop(&mut self) {
        self.shared.close();
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
) {
    while let Some(Outbound {
        correlation_id,
        text,
    }) = outbound.recv().await
    {
        trace!(%correlation_id, "Sending modify command");
        if let Err(e) = sink.send(Message::Text(text)).await {
            warn!(error = %e, "Live channel send failed");
            shared.complete(&correlation_id, Err(PublishError::Send(e.to_string())));
            shared.close();
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(mut source: SplitStream<WsStream>, shared: Arc<Shared>) {
    let mut sweep = time::interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => route_response(&shared, &text),
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Live channel closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Live channel receive failed");
                    break;
                }
                None => break,
            },
            _ = sweep.tick() => shared.expire(Instant::now()),
        }
    }
    shared.close();
}

fn route_response(shared: &Shared, text: &str) {
    let Some(response) = protocol::parse_response(text) else {
        trace!(frame = %text, "Ignoring uncorrelated frame");
        return;
    };
    let success = response.is_success();
    let CommandResponse {
        correlation_id,
        status,
        message,
    } = response;
    let outcome = if success {
        Ok(())
    } else {
        Err(PublishError::Rejected {
            status,
            message: message.unwrap_or_default(),
        })
    };
    if !shared.complete(&correlation_id, outcome) {
        trace!(%correlation_id, "Response for unknown correlation id");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(shared: &Shared, correlation_id: &str) -> PublishHandle {
        let (completer, handle) = PublishHandle::pending();
        assert!(shared
            .register(correlation_id.to_string(), completer, PUBLISH_TIMEOUT)
            .is_ok());
        handle
    }

    #[tokio::test]
    async fn test_closed_channel_fails_new_publishes() {
        let shared = Shared::default();
        let handle = track(&shared, "a");
        shared.close();
        assert_eq!(handle.outcome().await, Err(PublishError::ConnectionClosed));

        let (completer, _handle) = PublishHandle::pending();
        assert!(shared
            .register("b".to_string(), completer, PUBLISH_TIMEOUT)
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_publishes_expire() {
        let shared = Shared::default();
        let early = track(&shared, "early");
        time::advance(Duration::from_secs(4)).await;
        let late = track(&shared, "late");

        shared.expire(Instant::now() + Duration::from_secs(7));
        assert_eq!(shared.pending_count(), 1);
        assert_eq!(early.outcome().await, Err(PublishError::Timeout(10_000)));

        route_response(&shared, r#"{"headers":{"correlation-id":"late"},"status":204}"#);
        assert_eq!(late.outcome().await, Ok(()));
        assert_eq!(shared.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_route_response() {
        let shared = Shared::default();
        let ok_handle = track(&shared, "ok");
        let err_handle = track(&shared, "err");

        route_response(&shared, r#"{"headers":{"correlation-id":"ok"},"status":204}"#);
        route_response(
            &shared,
            r#"{"headers":{"correlation-id":"err"},"status":404,"value":{"message":"no feature"}}"#,
        );
        route_response(&shared, r#"{"headers":{"correlation-id":"unknown"},"status":204}"#);

        assert_eq!(ok_handle.outcome().await, Ok(()));
        assert_eq!(
            err_handle.outcome().await,
            Err(PublishError::Rejected {
                status: 404,
                message: "no feature".to_string()
            })
        );
        assert_eq!(shared.pending_count(), 0);
    }
}
