//! Line-delimited JSON control socket.

use std::io;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::protocol::{ErrorPayload, Request, Response};
use crate::bus::QueueSnapshot;
use crate::relay::Relay;

/// Longest request line accepted, line terminator excluded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

enum LineRead {
    Line,
    TooLong,
    Closed,
}

#[derive(Debug, Serialize)]
struct Notified {
    seq: Option<u64>,
}

#[derive(Debug, Serialize)]
struct StatusView {
    #[serde(flatten)]
    snapshot: QueueSnapshot,
    degraded: bool,
}

impl From<QueueSnapshot> for StatusView {
    fn from(snapshot: QueueSnapshot) -> Self {
        Self {
            degraded: snapshot.degraded(),
            snapshot,
        }
    }
}

/// Accept control connections until the listener fails.
pub async fn serve(listener: TcpListener, relay: Arc<Relay>) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "control socket listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            debug!(%peer, "control client connected");
            if let Err(e) = handle_connection(stream, &relay).await {
                warn!(%peer, "control connection error: {e}");
            }
            debug!(%peer, "control client disconnected");
        });
    }
}

async fn handle_connection<S>(stream: S, relay: &Relay) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);
    let mut buf = Vec::new();
    loop {
        let response = match read_bounded_line(&mut reader, &mut buf).await? {
            LineRead::Closed => return Ok(()),
            LineRead::TooLong => {
                warn!(limit = MAX_LINE_BYTES, "control request line too long; closing");
                let message = format!("request line exceeds {MAX_LINE_BYTES} bytes");
                let rejected = Response::err(ErrorPayload::invalid_request(message));
                write_response(&mut write, &rejected).await?;
                return Ok(());
            }
            LineRead::Line => match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => handle_line(relay, line).await,
                Err(e) => Response::err(ErrorPayload::invalid_request(e.to_string())),
            },
        };
        write_response(&mut write, &response).await?;
    }
}

/// Read one `\n`-terminated line into `buf` without buffering more than
/// [`MAX_LINE_BYTES`] of it.
async fn read_bounded_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_LINE_BYTES as u64 + 1;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(LineRead::Closed);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > MAX_LINE_BYTES {
        return Ok(LineRead::TooLong);
    }
    Ok(LineRead::Line)
}

async fn write_response<W>(write: &mut W, response: &Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = serde_json::to_string(response)?;
    out.push('\n');
    write.write_all(out.as_bytes()).await
}

pub async fn handle_line(relay: &Relay, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle_request(relay, request).await,
        Err(e) => Response::err(ErrorPayload::invalid_request(e.to_string())),
    }
}

pub async fn handle_request(relay: &Relay, request: Request) -> Response {
    match request {
        Request::Connect { recipient_id } => match relay.connect(&recipient_id) {
            Ok(snapshot) => Response::ok(&StatusView::from(snapshot)),
            Err(e) => Response::err(e),
        },
        Request::Disconnect { recipient_id } => match relay.disconnect(&recipient_id) {
            Ok(snapshot) => Response::ok(&StatusView::from(snapshot)),
            Err(e) => Response::err(e),
        },
        Request::Notify {
            recipient_id,
            kind,
            subtype,
            data,
        } => match relay.notify_parts(&recipient_id, kind, &subtype, data) {
            Ok(seq) => Response::ok(&Notified { seq }),
            Err(e) => Response::err(e),
        },
        Request::Poll {
            recipient_id,
            since_seq,
        } => match relay.poll_events(&recipient_id, since_seq) {
            Ok(batch) => Response::ok(&batch),
            Err(e) => Response::err(e),
        },
        Request::Ack {
            recipient_id,
            up_to_seq,
        } => match relay.acknowledge(&recipient_id, up_to_seq) {
            Ok(outcome) => Response::ok(&outcome),
            Err(e) => Response::err(e),
        },
        Request::Replay {
            recipient_id,
            since_seq,
            limit,
        } => match relay.replay(&recipient_id, since_seq, limit).await {
            Ok(batch) => Response::ok(&batch),
            Err(e) => Response::err(e),
        },
        Request::Status { recipient_id } => match relay.snapshot(&recipient_id) {
            Ok(snapshot) => Response::ok(&StatusView::from(snapshot)),
            Err(e) => Response::err(e),
        },
        Request::Health => Response::ok(&relay.health()),
    }
}
