// tests/common/mock_transport.rs
//! Mock push transport for relay integration testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use playwatch_lib::bus::{FrameSink, FrameStream, InboundFrame, PushError};

/// Test-side view of a push connection: what the server wrote and a way
/// to speak as the client.
pub struct MockTransport {
    frames: Arc<Mutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
    client: mpsc::UnboundedSender<InboundFrame>,
}

/// Server-side write half handed to `PushChannel::serve`.
pub struct MockSink {
    frames: Arc<Mutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
}

/// Server-side read half handed to `PushChannel::serve`.
pub struct MockStream {
    inbound: mpsc::UnboundedReceiver<InboundFrame>,
}

impl MockTransport {
    pub fn new() -> (Self, MockSink, MockStream) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let fail_sends = Arc::new(AtomicBool::new(false));
        let (client, inbound) = mpsc::unbounded_channel();
        (
            Self {
                frames: Arc::clone(&frames),
                fail_sends: Arc::clone(&fail_sends),
                client,
            },
            MockSink { frames, fail_sends },
            MockStream { inbound },
        )
    }

    /// Make every subsequent server write fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn send_client(&self, text: &str) {
        let _ = self.client.send(InboundFrame::Text(text.to_string()));
    }

    pub fn hang_up(&self) {
        let _ = self.client.send(InboundFrame::Close);
    }

    pub async fn raw_frames(&self) -> Vec<String> {
        self.frames.lock().await.clone()
    }

    /// Wait until at least `count` frames were written, then return them.
    pub async fn wait_for_frames(&self, count: usize) -> Vec<Value> {
        for _ in 0..400 {
            let frames = self.raw_frames().await;
            if frames.len() >= count {
                return frames
                    .iter()
                    .map(|f| serde_json::from_str(f).expect("server wrote invalid JSON"))
                    .collect();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {count} frames, got {:?}", self.raw_frames().await);
    }
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: &str) -> Result<(), PushError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PushError::Transport("mock transport failure".to_string()));
        }
        self.frames.lock().await.push(text.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PushError> {
        Ok(())
    }
}

#[async_trait]
impl FrameStream for MockStream {
    async fn next_frame(&mut self) -> Result<Option<InboundFrame>, PushError> {
        Ok(self.inbound.recv().await)
    }
}
