//! Coordinator facade over the delivery core.
//!
//! Event sources, the control socket and the push listener all talk to a
//! [`Relay`]; none of them touch recipient state directly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{
    format_timestamp, AckOutcome, DeliveryError, DeliveryRouter, EventKind, EventPayload, PollBatch,
    PullChannel, PushChannel, QueueSnapshot, RecipientId, ReplayBatch, SourceOrder, Submission,
};
use crate::config::RelayConfig;
use crate::db::{queries, Database, EventLog};
use crate::recovery::{self, RecoveryReport};
use crate::AppError;

/// Handle given to one producer. Carries the registration ordinal used to
/// order envelopes created at the same instant.
#[derive(Clone)]
pub struct EventSource {
    name: Arc<str>,
    order: SourceOrder,
    router: Arc<DeliveryRouter>,
}

impl EventSource {
    pub fn order(&self) -> SourceOrder {
        self.order
    }

    /// Best-effort delivery; never fails from the source's point of view.
    pub fn notify(&self, recipient: &RecipientId, payload: impl Into<EventPayload>) {
        if self.router.submit(recipient, payload.into()).is_none() {
            warn!(source = %self.name, recipient = %recipient, "notification dropped");
        }
    }

    /// Prepare an entry for [`Relay::notify_batch`].
    pub fn submission(
        &self,
        payload: impl Into<EventPayload>,
        created_at: DateTime<Utc>,
    ) -> Submission {
        Submission {
            payload: payload.into(),
            created_at,
            source: self.order,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub recipients: usize,
    pub sources: u32,
    pub uptime_secs: u64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub collected: usize,
    pub pruned: usize,
    /// Retained sequence marks released from memory.
    pub expired: usize,
}

pub struct Relay {
    config: RelayConfig,
    router: Arc<DeliveryRouter>,
    push: PushChannel,
    pull: PullChannel,
    log: EventLog,
    db: Arc<Database>,
    next_source: AtomicU32,
    started: Instant,
}

impl Relay {
    /// Open the envelope log, recover state from it and wire up the channels.
    pub fn open(config: RelayConfig) -> Result<Self, AppError> {
        config.validate()?;
        let db = match &config.db_path {
            Some(path) => {
                info!(path = %path.display(), "opening envelope log");
                Database::open(path)?
            }
            None => {
                info!("no db_path configured; envelope log is in-memory");
                Database::open_in_memory()?
            }
        };
        let db = Arc::new(db);
        let log = EventLog::spawn(Arc::clone(&db))?;
        let router = Arc::new(DeliveryRouter::new(config.router_settings(), log.clone()));
        let report: RecoveryReport = recovery::recover(&router, &db)?;
        debug!(?report, "relay recovery complete");

        let push = PushChannel::new(Arc::clone(&router), config.push_send_timeout());
        let pull = PullChannel::new(Arc::clone(&router), log.clone(), Some(Arc::clone(&db)));
        Ok(Self {
            config,
            router,
            push,
            pull,
            log,
            db,
            next_source: AtomicU32::new(0),
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<DeliveryRouter> {
        &self.router
    }

    pub fn push_channel(&self) -> PushChannel {
        self.push.clone()
    }

    pub fn register_source(&self, name: &str) -> EventSource {
        let order = SourceOrder(self.next_source.fetch_add(1, Ordering::Relaxed));
        info!(source = name, order = order.0, "event source registered");
        EventSource {
            name: Arc::from(name),
            order,
            router: Arc::clone(&self.router),
        }
    }

    // -- boundary operations ------------------------------------------------

    pub fn notify(&self, recipient: &RecipientId, payload: EventPayload) {
        self.router.submit(recipient, payload);
    }

    /// Boundary form of [`notify`](Self::notify) for callers that hold raw
    /// `(kind, subtype, data)` triples. Only malformed input is reported.
    pub fn notify_parts(
        &self,
        recipient_id: &str,
        kind: EventKind,
        subtype: &str,
        data: Value,
    ) -> Result<Option<u64>, DeliveryError> {
        let recipient = RecipientId::parse(recipient_id)?;
        let payload = EventPayload::from_parts(kind, subtype, data)?;
        Ok(self.router.submit(&recipient, payload).map(|receipt| receipt.sequence))
    }

    pub fn notify_batch(&self, recipient: &RecipientId, batch: Vec<Submission>) {
        self.router.submit_batch(recipient, batch);
    }

    pub fn connect(&self, recipient_id: &str) -> Result<QueueSnapshot, DeliveryError> {
        let recipient = RecipientId::parse(recipient_id)?;
        Ok(self.router.connect(&recipient))
    }

    pub fn disconnect(&self, recipient_id: &str) -> Result<QueueSnapshot, DeliveryError> {
        let recipient = RecipientId::parse(recipient_id)?;
        Ok(self.router.disconnect(&recipient))
    }

    pub fn poll_events(
        &self,
        recipient_id: &str,
        since_seq: u64,
    ) -> Result<PollBatch, DeliveryError> {
        self.pull.poll(recipient_id, since_seq)
    }

    pub fn acknowledge(
        &self,
        recipient_id: &str,
        up_to_seq: u64,
    ) -> Result<AckOutcome, DeliveryError> {
        self.pull.acknowledge(recipient_id, up_to_seq)
    }

    pub async fn replay(
        &self,
        recipient_id: &str,
        since_seq: u64,
        limit: Option<usize>,
    ) -> Result<ReplayBatch, DeliveryError> {
        self.pull.replay(recipient_id, since_seq, limit).await
    }

    pub fn snapshot(&self, recipient_id: &str) -> Result<QueueSnapshot, DeliveryError> {
        self.pull.status(recipient_id)
    }

    pub fn health(&self) -> Health {
        Health {
            status: "healthy",
            recipients: self.router.recipient_count(),
            sources: self.next_source.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
            timestamp: format_timestamp(&Utc::now()),
        }
    }

    /// Wait for every pending log write to commit. `false` if the commit
    /// failed and the writes are being retried.
    pub async fn flush(&self) -> bool {
        self.log.flush().await
    }

    // -- maintenance --------------------------------------------------------

    /// Collect idle recipients, prune envelopes past the retention window
    /// and release retained marks older than it.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let collected = self.router.collect_idle().len();

        let retention = chrono::Duration::from_std(self.config.log_retention())
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = format_timestamp(&(Utc::now() - retention));
        let committed = self.log.flush().await;
        let db = Arc::clone(&self.db);
        let prune =
            tokio::task::spawn_blocking(move || queries::prune_envelopes_before(&db, &cutoff));
        let pruned = match prune.await {
            Ok(Ok(pruned)) => pruned,
            Ok(Err(e)) => {
                error!("failed to prune envelope log: {e}");
                0
            }
            Err(e) => {
                error!("envelope log prune task failed: {e}");
                0
            }
        };

        // Released marks are read back from the log, so they must be committed.
        let expired = if committed {
            self.router.expire_retained(self.config.log_retention())
        } else {
            warn!("envelope log behind; keeping retained sequence marks");
            0
        };

        if collected > 0 || pruned > 0 || expired > 0 {
            info!(collected, pruned, expired, "maintenance sweep");
        }
        MaintenanceReport {
            collected,
            pruned,
            expired,
        }
    }

    /// Run [`run_maintenance`](Self::run_maintenance) every `sweep_interval`.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(relay.config.sweep_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                relay.run_maintenance().await;
            }
        })
    }
}
