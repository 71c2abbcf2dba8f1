//! WebSocket push listener.
//!
//! Clients connect to `/events/{recipient_id}`; everything after the
//! handshake is handled by [`PushChannel::serve`].

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, info, warn};

use crate::bus::{FrameSink, FrameStream, InboundFrame, PushChannel, PushError, RecipientId};

const EVENTS_PATH_PREFIX: &str = "/events/";

// ---------------------------------------------------------------------------
// Transport adapters
// ---------------------------------------------------------------------------

pub struct WsSink(SplitSink<WebSocketStream<TcpStream>, Message>);

pub struct WsStream(SplitStream<WebSocketStream<TcpStream>>);

fn map_ws_error(e: WsError) -> PushError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => PushError::Closed,
        other => PushError::Transport(other.to_string()),
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: &str) -> Result<(), PushError> {
        self.0
            .send(Message::Text(text.to_string()))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), PushError> {
        self.0.close().await.map_err(map_ws_error)
    }
}

#[async_trait]
impl FrameStream for WsStream {
    async fn next_frame(&mut self) -> Result<Option<InboundFrame>, PushError> {
        loop {
            match self.0.next().await {
                None => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(InboundFrame::Text(text))),
                Some(Ok(Message::Close(_))) => return Ok(Some(InboundFrame::Close)),
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(map_ws_error(e)),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Extract the recipient id from a `/events/{recipient_id}` request path.
pub fn recipient_from_path(path: &str) -> Result<RecipientId, String> {
    let raw = path
        .strip_prefix(EVENTS_PATH_PREFIX)
        .ok_or_else(|| format!("expected {EVENTS_PATH_PREFIX}{{recipient_id}}, got {path}"))?;
    let raw = raw.trim_end_matches('/');
    if raw.contains('/') {
        return Err(format!("unexpected path segments in {path}"));
    }
    RecipientId::parse(raw).map_err(|e| e.to_string())
}

fn bad_request(message: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

/// Accept push connections until the listener fails.
pub async fn serve(listener: TcpListener, push: PushChannel) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "push socket listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let push = push.clone();
        tokio::spawn(async move { handle_socket(stream, peer, push).await });
    }
}

async fn handle_socket(stream: TcpStream, peer: SocketAddr, push: PushChannel) {
    let mut recipient = None;
    let handshake = accept_hdr_async(stream, |request: &Request, response: Response| {
        match recipient_from_path(request.uri().path()) {
            Ok(id) => {
                recipient = Some(id);
                Ok(response)
            }
            Err(message) => Err(bad_request(message)),
        }
    })
    .await;

    let ws = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, "websocket handshake failed: {e}");
            return;
        }
    };
    let Some(recipient) = recipient else {
        return;
    };

    info!(%peer, recipient = %recipient, "desktop client connected via websocket");
    let (sink, stream) = ws.split();
    let summary = push.serve(recipient, WsSink(sink), WsStream(stream)).await;
    debug!(%peer, ?summary, "websocket session closed");
}
