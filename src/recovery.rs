//! Startup recovery from the envelope log.

use std::sync::Arc;

use tracing::{info, warn};

use crate::bus::{DeliveryRouter, EventEnvelope, RecipientId, SequenceMarks};
use crate::db::{queries, Database, DbError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub recipients: usize,
    pub requeued: usize,
    /// Restored envelopes dropped by the queue depth bound.
    pub evicted: usize,
    /// Rows that could not be decoded.
    pub skipped: usize,
}

/// Reload sequence marks and re-queue every logged envelope the recipient
/// has not acknowledged.
pub fn recover(router: &DeliveryRouter, db: &Database) -> Result<RecoveryReport, DbError> {
    let mut report = RecoveryReport::default();

    for marks in queries::list_recipient_marks(db)? {
        let recipient = match RecipientId::parse(&marks.recipient_id) {
            Ok(recipient) => recipient,
            Err(e) => {
                warn!(recipient = %marks.recipient_id, "skipping unrecoverable recipient: {e}");
                report.skipped += 1;
                continue;
            }
        };

        let rows = queries::list_envelopes_after(
            db,
            &marks.recipient_id,
            marks.last_delivered_seq,
            usize::MAX,
        )?;
        let mut undelivered = Vec::with_capacity(rows.len());
        for row in rows {
            match EventEnvelope::from_wire(&row.wire_json) {
                Ok(envelope) => undelivered.push(Arc::new(envelope)),
                Err(e) => {
                    warn!(
                        recipient = %recipient,
                        seq = row.seq,
                        "skipping unreadable logged envelope: {e}"
                    );
                    report.skipped += 1;
                }
            }
        }

        let restored = undelivered.len();
        let evicted = router.restore_recipient(
            recipient,
            SequenceMarks {
                last_assigned: u64::try_from(marks.last_assigned_seq).unwrap_or(0),
                last_delivered: u64::try_from(marks.last_delivered_seq).unwrap_or(0),
            },
            undelivered,
        );
        report.recipients += 1;
        report.requeued += restored - evicted;
        report.evicted += evicted;
    }

    info!(
        recipients = report.recipients,
        requeued = report.requeued,
        evicted = report.evicted,
        skipped = report.skipped,
        "recovered delivery state from envelope log"
    );
    Ok(report)
}
