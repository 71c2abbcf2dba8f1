use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::queries::{self, DeliveredMark, EnvelopeRow, LogBatch};
use super::Database;
use crate::bus::{format_timestamp, EventEnvelope, RecipientId, SequenceMarks};

/// Upper bound on new writes absorbed per transaction.
const MAX_BATCH: usize = 512;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
/// Attempts left for a failing batch once every sender is gone.
const SHUTDOWN_ATTEMPTS: u32 = 3;

enum LogCommand {
    Append(EnvelopeRow),
    Delivered(DeliveredMark),
    Flush(oneshot::Sender<bool>),
}

/// Non-blocking handle to the envelope log writer.
///
/// Callers on the delivery path only push onto a channel; a dedicated
/// thread drains it and commits in batches. A batch that fails to commit
/// is kept and retried with backoff; failures never surface to producers.
#[derive(Clone)]
pub struct EventLog {
    tx: Option<mpsc::UnboundedSender<LogCommand>>,
    db: Option<Arc<Database>>,
}

impl EventLog {
    /// Start the writer thread for `db`.
    pub fn spawn(db: Arc<Database>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_db = Arc::clone(&db);
        thread::Builder::new()
            .name("playwatch-log".to_string())
            .spawn(move || run_writer(writer_db, rx))?;
        Ok(Self {
            tx: Some(tx),
            db: Some(db),
        })
    }

    /// A log that records nothing.
    pub fn detached() -> Self {
        Self { tx: None, db: None }
    }

    pub fn is_attached(&self) -> bool {
        self.tx.is_some()
    }

    pub fn append(&self, recipient: &RecipientId, envelope: &EventEnvelope) {
        self.send(LogCommand::Append(EnvelopeRow {
            recipient_id: recipient.as_str().to_string(),
            seq: seq_to_db(envelope.sequence()),
            kind: envelope.kind().as_str().to_string(),
            subtype: envelope.subtype().to_string(),
            wire_json: envelope.wire_str().to_string(),
            created_at: format_timestamp(&envelope.created_at()),
        }));
    }

    pub fn delivered(&self, recipient: &RecipientId, seq: u64) {
        self.send(LogCommand::Delivered(DeliveredMark {
            recipient_id: recipient.as_str().to_string(),
            seq: seq_to_db(seq),
        }));
    }

    /// Committed sequence marks for `recipient`. Reads the database
    /// directly; writes still queued are not reflected.
    pub fn recorded_marks(&self, recipient: &RecipientId) -> Option<SequenceMarks> {
        let db = self.db.as_ref()?;
        match queries::get_recipient_marks(db, recipient.as_str()) {
            Ok(row) => row.map(|row| SequenceMarks {
                last_assigned: u64::try_from(row.last_assigned_seq).unwrap_or(0),
                last_delivered: u64::try_from(row.last_delivered_seq).unwrap_or(0),
            }),
            Err(e) => {
                error!(recipient = %recipient, "failed to read recorded sequence marks: {e}");
                None
            }
        }
    }

    /// Wait for one commit attempt covering every write issued before this
    /// call. Returns `false` if that attempt failed; the writes are retried.
    pub async fn flush(&self) -> bool {
        let Some(tx) = &self.tx else {
            return true;
        };
        let (done, wait) = oneshot::channel();
        if tx.send(LogCommand::Flush(done)).is_err() {
            return false;
        }
        wait.await.unwrap_or(false)
    }

    fn send(&self, command: LogCommand) {
        if let Some(tx) = &self.tx {
            if tx.send(command).is_err() {
                warn!("envelope log writer is gone; write dropped");
            }
        }
    }
}

pub(crate) fn seq_to_db(seq: u64) -> i64 {
    i64::try_from(seq).unwrap_or(i64::MAX)
}

/// Writes waiting to be committed, kept across failed attempts.
#[derive(Default)]
struct PendingWrites {
    appends: Vec<EnvelopeRow>,
    delivered: HashMap<String, i64>,
    waiters: Vec<oneshot::Sender<bool>>,
}

impl PendingWrites {
    fn absorb(&mut self, command: LogCommand) {
        match command {
            LogCommand::Append(row) => self.appends.push(row),
            LogCommand::Delivered(mark) => {
                let seq = self.delivered.entry(mark.recipient_id).or_insert(mark.seq);
                *seq = (*seq).max(mark.seq);
            }
            LogCommand::Flush(done) => self.waiters.push(done),
        }
    }

    fn writes(&self) -> usize {
        self.appends.len() + self.delivered.len()
    }

    fn is_idle(&self) -> bool {
        self.writes() == 0 && self.waiters.is_empty()
    }

    /// Try to commit everything pending, then answer flush waiters.
    fn commit(&mut self, db: &Database) -> bool {
        let committed = self.writes() == 0 || self.write(db);
        for done in self.waiters.drain(..) {
            let _ = done.send(committed);
        }
        committed
    }

    fn write(&mut self, db: &Database) -> bool {
        let batch = LogBatch {
            appends: std::mem::take(&mut self.appends),
            delivered: self
                .delivered
                .iter()
                .map(|(recipient_id, seq)| DeliveredMark {
                    recipient_id: recipient_id.clone(),
                    seq: *seq,
                })
                .collect(),
        };
        let updated_at = format_timestamp(&Utc::now());
        match queries::write_log_batch(db, &batch, &updated_at) {
            Ok(()) => {
                debug!(writes = batch.len(), "envelope log batch committed");
                self.delivered.clear();
                true
            }
            Err(e) => {
                error!(writes = batch.len(), "failed to write envelope log batch, will retry: {e}");
                self.appends = batch.appends;
                false
            }
        }
    }
}

fn run_writer(db: Arc<Database>, mut rx: mpsc::UnboundedReceiver<LogCommand>) {
    debug!("envelope log writer started");
    let mut pending = PendingWrites::default();
    let mut retry_delay: Option<Duration> = None;
    let mut open = true;
    let mut attempts_left = SHUTDOWN_ATTEMPTS;

    loop {
        if let Some(delay) = retry_delay {
            thread::sleep(delay);
        } else if pending.is_idle() {
            match rx.blocking_recv() {
                Some(command) => pending.absorb(command),
                None => break,
            }
        }

        let mut absorbed = 0;
        while open && absorbed < MAX_BATCH {
            match rx.try_recv() {
                Ok(command) => {
                    pending.absorb(command);
                    absorbed += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => open = false,
            }
        }

        if pending.commit(&db) {
            retry_delay = None;
        } else if !open && attempts_left <= 1 {
            error!(
                writes = pending.writes(),
                "envelope log writer closed with uncommitted writes"
            );
            break;
        } else {
            if !open {
                attempts_left -= 1;
            }
            retry_delay = Some(retry_delay.map_or(RETRY_BASE_DELAY, |delay| {
                (delay * 2).min(RETRY_MAX_DELAY)
            }));
        }

        if !open && pending.is_idle() {
            break;
        }
    }
    debug!("envelope log writer stopped");
}
