//! Push channel: streams envelopes over a live duplex connection.
//!
//! The router never writes to a socket itself. Each connection owns an
//! outbox; the router offers envelopes into it without blocking and the
//! connection's task performs the actual writes, confirming each one back
//! to the router once the transport accepted it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{format_timestamp, DeliveryRouter, EventEnvelope, RecipientId};

pub type ConnectionId = Uuid;

const WELCOME_MESSAGE: &str = "Connected to Roblox Monitor WebSocket";

// ============================================================================
// Transport seam
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("connection closed")]
    Closed,
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Close,
}

/// Write half of a push connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: &str) -> Result<(), PushError>;
    async fn close(&mut self) -> Result<(), PushError>;
}

/// Read half of a push connection.
///
/// `next_frame` must be cancel-safe: it is polled inside a `select!` and
/// dropped whenever an outbound envelope is ready first.
#[async_trait]
pub trait FrameStream: Send {
    /// `Ok(None)` once the peer has gone away.
    async fn next_frame(&mut self) -> Result<Option<InboundFrame>, PushError>;
}

// ============================================================================
// Connection handle
// ============================================================================

/// Router-side end of a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbox: mpsc::UnboundedSender<Arc<EventEnvelope>>,
    closer: Arc<Notify>,
}

/// Connection-side end: what the writer task consumes.
#[derive(Debug)]
pub struct ConnectionMailbox {
    inbox: mpsc::UnboundedReceiver<Arc<EventEnvelope>>,
    closer: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn open() -> (Self, ConnectionMailbox) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let closer = Arc::new(Notify::new());
        let handle = Self {
            id: Uuid::new_v4(),
            outbox,
            closer: Arc::clone(&closer),
        };
        (handle, ConnectionMailbox { inbox, closer })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Hand an envelope to the connection. Never blocks.
    pub fn offer(&self, envelope: Arc<EventEnvelope>) -> Result<(), PushError> {
        self.outbox.send(envelope).map_err(|_| PushError::Closed)
    }

    /// Ask the connection task to shut down.
    pub fn force_close(&self) {
        self.closer.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

impl ConnectionMailbox {
    pub async fn recv(&mut self) -> Option<Arc<EventEnvelope>> {
        self.inbox.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<EventEnvelope>> {
        self.inbox.try_recv().ok()
    }

    /// Resolves once the router force-closed this connection.
    pub async fn closed(&self) {
        self.closer.notified().await;
    }
}

// ============================================================================
// Control frames
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame<'a> {
    Welcome {
        recipient_id: &'a str,
        message: &'a str,
        last_delivered_seq: u64,
        last_assigned_seq: u64,
        timestamp: String,
    },
    Pong {
        timestamp: String,
    },
    Acknowledged {
        up_to_seq: u64,
        retired: usize,
        stale: bool,
    },
    Error {
        code: &'a str,
        message: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Ping,
    DesktopReady,
    Ack {
        up_to_seq: u64,
    },
    Command {
        #[serde(default)]
        payload: Value,
    },
}

// ============================================================================
// Channel
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the connection or the stream ended.
    ClientClosed,
    /// Router closed it: a newer connection took over, the recipient
    /// disconnected, or a push failed.
    Superseded,
    SendTimeout,
    Transport(String),
}

impl From<PushError> for CloseReason {
    fn from(e: PushError) -> Self {
        match e {
            PushError::Closed => Self::ClientClosed,
            PushError::Timeout(_) => Self::SendTimeout,
            PushError::Transport(detail) => Self::Transport(detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub connection_id: ConnectionId,
    pub recipient_id: RecipientId,
    /// Envelopes written to the transport.
    pub delivered: u64,
    pub reason: CloseReason,
}

/// Runs one push connection from welcome frame to teardown.
#[derive(Clone)]
pub struct PushChannel {
    router: Arc<DeliveryRouter>,
    send_timeout: Duration,
}

impl PushChannel {
    pub fn new(router: Arc<DeliveryRouter>, send_timeout: Duration) -> Self {
        Self {
            router,
            send_timeout,
        }
    }

    /// Serve a connection until the peer leaves or the router closes it.
    ///
    /// Queued envelopes are drained onto the connection, in sequence order,
    /// before anything submitted afterwards.
    pub async fn serve<S, R>(
        &self,
        recipient: RecipientId,
        mut sink: S,
        mut stream: R,
    ) -> ConnectionSummary
    where
        S: FrameSink,
        R: FrameStream,
    {
        let (handle, mailbox) = ConnectionHandle::open();
        let ConnectionMailbox { mut inbox, closer } = mailbox;
        let connection_id = handle.id();
        let mut delivered = 0u64;

        let snapshot = self.router.snapshot(&recipient);
        let welcome = ServerFrame::Welcome {
            recipient_id: recipient.as_str(),
            message: WELCOME_MESSAGE,
            last_delivered_seq: snapshot.last_delivered_seq,
            last_assigned_seq: snapshot.last_assigned_seq,
            timestamp: format_timestamp(&Utc::now()),
        };
        if let Err(e) = self.send_frame(&mut sink, &welcome).await {
            warn!(
                recipient = %recipient,
                connection = %connection_id,
                "failed to send welcome: {e}"
            );
            return ConnectionSummary {
                connection_id,
                recipient_id: recipient,
                delivered,
                reason: e.into(),
            };
        }

        let outcome = self.router.register_connection(&recipient, handle);
        debug!(
            recipient = %recipient,
            connection = %connection_id,
            drained = outcome.drained,
            pending = outcome.pending,
            "push connection live"
        );

        let reason = loop {
            tokio::select! {
                biased;
                _ = closer.notified() => break CloseReason::Superseded,
                next = inbox.recv() => {
                    let Some(envelope) = next else {
                        break CloseReason::Superseded;
                    };
                    match self.send_text(&mut sink, envelope.wire_str()).await {
                        Ok(()) => {
                            delivered += 1;
                            let seq = envelope.sequence();
                            self.router.confirm_sent(&recipient, connection_id, seq);
                        }
                        Err(e) => {
                            warn!(
                                recipient = %recipient,
                                connection = %connection_id,
                                seq = envelope.sequence(),
                                "push send failed: {e}"
                            );
                            break e.into();
                        }
                    }
                }
                frame = stream.next_frame() => match frame {
                    Ok(Some(InboundFrame::Text(text))) => {
                        let handled = self.handle_client_frame(&recipient, &mut sink, &text).await;
                        if let Err(e) = handled {
                            break e.into();
                        }
                    }
                    Ok(Some(InboundFrame::Close)) | Ok(None) => break CloseReason::ClientClosed,
                    Err(e) => break e.into(),
                },
            }
        };

        self.router.unregister_connection(&recipient, connection_id);
        if let Err(e) = sink.close().await {
            debug!(recipient = %recipient, connection = %connection_id, "close failed: {e}");
        }
        info!(
            recipient = %recipient,
            connection = %connection_id,
            delivered,
            reason = ?reason,
            "push connection ended"
        );
        ConnectionSummary {
            connection_id,
            recipient_id: recipient,
            delivered,
            reason,
        }
    }

    async fn handle_client_frame<S: FrameSink>(
        &self,
        recipient: &RecipientId,
        sink: &mut S,
        text: &str,
    ) -> Result<(), PushError> {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(recipient = %recipient, "invalid frame from client: {e}");
                let reply = ServerFrame::Error {
                    code: "invalid_request",
                    message: e.to_string(),
                };
                return self.send_frame(sink, &reply).await;
            }
        };

        match frame {
            ClientFrame::Ping => {
                let pong = ServerFrame::Pong {
                    timestamp: format_timestamp(&Utc::now()),
                };
                self.send_frame(sink, &pong).await
            }
            ClientFrame::DesktopReady => {
                info!(recipient = %recipient, "client ready to receive events");
                Ok(())
            }
            ClientFrame::Command { payload } => {
                let command = payload.get("command").and_then(Value::as_str).unwrap_or("");
                info!(recipient = %recipient, command, "command received from client");
                Ok(())
            }
            ClientFrame::Ack { up_to_seq } => {
                let reply = match self.router.acknowledge(recipient, up_to_seq) {
                    Ok(outcome) => ServerFrame::Acknowledged {
                        up_to_seq,
                        retired: outcome.retired,
                        stale: outcome.stale,
                    },
                    Err(e) => ServerFrame::Error {
                        code: e.code(),
                        message: e.to_string(),
                    },
                };
                self.send_frame(sink, &reply).await
            }
        }
    }

    async fn send_frame<S: FrameSink>(
        &self,
        sink: &mut S,
        frame: &ServerFrame<'_>,
    ) -> Result<(), PushError> {
        let text = serde_json::to_string(frame).map_err(|e| PushError::Transport(e.to_string()))?;
        self.send_text(sink, &text).await
    }

    async fn send_text<S: FrameSink>(&self, sink: &mut S, text: &str) -> Result<(), PushError> {
        match tokio::time::timeout(self.send_timeout, sink.send_text(text)).await {
            Ok(result) => result,
            Err(_) => Err(PushError::Timeout(self.send_timeout)),
        }
    }
}
