//! Pull channel: request/response access to a recipient's queue.
//!
//! Only the pull side validates caller input. Polls never remove anything;
//! envelopes leave the queue on acknowledge.

use std::sync::Arc;

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use super::{
    AckOutcome, DeliveryError, DeliveryRouter, EventEnvelope, QueueSnapshot, RecipientId,
    RecipientPhase,
};
use crate::db::{queries, seq_to_db, Database, EventLog};

/// Most envelopes a single replay returns.
pub const MAX_REPLAY: usize = 1000;

fn serialize_wire<S: Serializer>(
    events: &[Arc<EventEnvelope>],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(events.iter().map(|envelope| envelope.wire()))
}

/// Result of a poll: queued envelopes after the caller's cursor plus the
/// queue's health.
#[derive(Debug, Clone, Serialize)]
pub struct PollBatch {
    pub recipient_id: RecipientId,
    #[serde(serialize_with = "serialize_wire")]
    pub events: Vec<Arc<EventEnvelope>>,
    pub phase: RecipientPhase,
    pub last_delivered_seq: u64,
    pub last_assigned_seq: u64,
    pub overflow_count: u64,
    pub degraded: bool,
}

impl PollBatch {
    fn new(events: Vec<Arc<EventEnvelope>>, snapshot: QueueSnapshot) -> Self {
        Self {
            degraded: snapshot.degraded(),
            recipient_id: snapshot.recipient_id,
            events,
            phase: snapshot.phase,
            last_delivered_seq: snapshot.last_delivered_seq,
            last_assigned_seq: snapshot.last_assigned_seq,
            overflow_count: snapshot.overflow_count,
        }
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.events.iter().map(|envelope| envelope.sequence()).collect()
    }
}

/// Envelopes read back from the log, including already-delivered ones.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayBatch {
    pub recipient_id: RecipientId,
    #[serde(serialize_with = "serialize_wire")]
    pub events: Vec<Arc<EventEnvelope>>,
    pub last_assigned_seq: u64,
    /// More envelopes exist past the returned ones.
    pub truncated: bool,
}

#[derive(Clone)]
pub struct PullChannel {
    router: Arc<DeliveryRouter>,
    log: EventLog,
    db: Option<Arc<Database>>,
}

impl PullChannel {
    pub fn new(router: Arc<DeliveryRouter>, log: EventLog, db: Option<Arc<Database>>) -> Self {
        Self { router, log, db }
    }

    /// Every queued envelope with sequence greater than `since_seq`.
    pub fn poll(&self, recipient_id: &str, since_seq: u64) -> Result<PollBatch, DeliveryError> {
        let recipient = RecipientId::parse(recipient_id)?;
        let (events, snapshot) = self.router.read_since(&recipient, since_seq)?;
        debug!(recipient = %recipient, since_seq, returned = events.len(), "poll");
        Ok(PollBatch::new(events, snapshot))
    }

    pub fn acknowledge(
        &self,
        recipient_id: &str,
        up_to_seq: u64,
    ) -> Result<AckOutcome, DeliveryError> {
        let recipient = RecipientId::parse(recipient_id)?;
        self.router.acknowledge(&recipient, up_to_seq)
    }

    pub fn status(&self, recipient_id: &str) -> Result<QueueSnapshot, DeliveryError> {
        let recipient = RecipientId::parse(recipient_id)?;
        Ok(self.router.snapshot(&recipient))
    }

    /// Read envelopes after `since_seq` from the log, delivered or not.
    pub async fn replay(
        &self,
        recipient_id: &str,
        since_seq: u64,
        limit: Option<usize>,
    ) -> Result<ReplayBatch, DeliveryError> {
        let recipient = RecipientId::parse(recipient_id)?;
        let snapshot = self.router.snapshot(&recipient);
        if since_seq > snapshot.last_assigned_seq {
            return Err(DeliveryError::InvalidSequence {
                seq: since_seq,
                last_assigned: snapshot.last_assigned_seq,
            });
        }
        let Some(db) = self.db.clone() else {
            return Err(DeliveryError::LogUnavailable(
                "no envelope log configured".to_string(),
            ));
        };
        let limit = limit.unwrap_or(MAX_REPLAY).clamp(1, MAX_REPLAY);

        if !self.log.flush().await {
            warn!(recipient = %recipient, "envelope log behind; replay may miss recent envelopes");
        }
        let key = recipient.as_str().to_string();
        let after = seq_to_db(since_seq);
        // One extra row tells us whether the result was cut short.
        let rows = tokio::task::spawn_blocking(move || {
            queries::list_envelopes_after(&db, &key, after, limit + 1)
        })
        .await
        .map_err(|e| DeliveryError::LogUnavailable(e.to_string()))?
        .map_err(|e| DeliveryError::LogUnavailable(e.to_string()))?;

        let truncated = rows.len() > limit;
        let mut events = Vec::with_capacity(rows.len().min(limit));
        for row in rows.into_iter().take(limit) {
            match EventEnvelope::from_wire(&row.wire_json) {
                Ok(envelope) => events.push(Arc::new(envelope)),
                Err(e) => warn!(
                    recipient = %recipient,
                    seq = row.seq,
                    "skipping unreadable logged envelope: {e}"
                ),
            }
        }
        debug!(recipient = %recipient, since_seq, returned = events.len(), truncated, "replay");

        Ok(ReplayBatch {
            recipient_id: recipient,
            events,
            last_assigned_seq: snapshot.last_assigned_seq,
            truncated,
        })
    }
}
