//! Per-recipient routing: push when a live connection can take the envelope,
//! queue otherwise.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use super::push::{ConnectionHandle, ConnectionId};
use super::{DeliveryError, EventEnvelope, EventPayload, RecipientId, RecipientQueue};
use crate::db::EventLog;

const DEFAULT_MAX_QUEUE_DEPTH: usize = 1000;
const DEFAULT_MAX_IN_FLIGHT: usize = 256;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Settings and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    pub max_queue_depth: usize,
    /// Envelopes handed to a live connection but not yet confirmed written.
    pub max_in_flight: usize,
    pub idle_timeout: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Registration ordinal of an event source, used to break `created_at` ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SourceOrder(pub u32);

/// One entry of a batch submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub payload: EventPayload,
    pub created_at: DateTime<Utc>,
    pub source: SourceOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueReason {
    /// No live connection for the recipient.
    ChannelUnavailable,
    /// Older envelopes are still queued; this one waits behind them.
    Backlog,
    /// The connection's in-flight window is full.
    WindowFull,
    /// Handing the envelope to the connection failed; the connection is gone.
    PushFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Pushed,
    Queued(QueueReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub sequence: u64,
    pub routing: Routing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterOutcome {
    /// Older connection that was force-closed by this registration.
    pub superseded: Option<ConnectionId>,
    /// Queued envelopes moved onto the new connection immediately.
    pub drained: usize,
    /// Envelopes still waiting for window space.
    pub pending: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AckOutcome {
    /// Queued or in-flight envelopes removed from memory.
    pub retired: usize,
    /// The sequence was already at or below the delivered watermark.
    pub stale: bool,
    pub last_delivered_seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientPhase {
    Unknown,
    Offline,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub recipient_id: RecipientId,
    pub phase: RecipientPhase,
    pub present: bool,
    pub queued: usize,
    pub in_flight: usize,
    pub max_queue_depth: usize,
    pub overflow_count: u64,
    pub last_delivered_seq: u64,
    pub last_assigned_seq: u64,
}

impl QueueSnapshot {
    pub fn degraded(&self) -> bool {
        self.overflow_count > 0
    }
}

/// Sequence watermarks that outlive a collected recipient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceMarks {
    pub last_assigned: u64,
    pub last_delivered: u64,
}

/// Marks of a recipient with no live state, and when they were set aside.
#[derive(Debug, Clone, Copy)]
struct RetainedMarks {
    marks: SequenceMarks,
    since: Instant,
}

impl RetainedMarks {
    fn new(marks: SequenceMarks) -> Self {
        Self {
            marks,
            since: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedRecipient {
    pub recipient_id: RecipientId,
    /// Envelopes still queued at collection time; they remain in the log.
    pub undelivered: usize,
    pub marks: SequenceMarks,
}

// ---------------------------------------------------------------------------
// Recipient state
// ---------------------------------------------------------------------------

struct RecipientState {
    id: RecipientId,
    connection: Option<ConnectionHandle>,
    queue: RecipientQueue,
    in_flight: VecDeque<Arc<EventEnvelope>>,
    last_assigned_seq: u64,
    last_delivered_seq: u64,
    present: bool,
    last_activity: Instant,
    retired: bool,
}

impl RecipientState {
    fn new(id: RecipientId, marks: SequenceMarks, max_queue_depth: usize) -> Self {
        Self {
            id,
            connection: None,
            queue: RecipientQueue::new(max_queue_depth),
            in_flight: VecDeque::new(),
            last_assigned_seq: marks.last_assigned,
            last_delivered_seq: marks.last_delivered,
            present: false,
            last_activity: Instant::now(),
            retired: false,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn is_current(&self, connection: ConnectionId) -> bool {
        self.connection.as_ref().map(ConnectionHandle::id) == Some(connection)
    }

    fn marks(&self) -> SequenceMarks {
        SequenceMarks {
            last_assigned: self.last_assigned_seq,
            last_delivered: self.last_delivered_seq,
        }
    }

    fn is_collectable(&self, now: Instant, wall: DateTime<Utc>, idle: Duration) -> bool {
        if self.connection.is_some() || now.duration_since(self.last_activity) < idle {
            return false;
        }
        match self.queue.newest() {
            None => true,
            Some(newest) => (wall - newest.created_at())
                .to_std()
                .map_or(false, |age| age >= idle),
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            recipient_id: self.id.clone(),
            phase: if self.connection.is_some() {
                RecipientPhase::Live
            } else {
                RecipientPhase::Offline
            },
            present: self.present,
            queued: self.queue.len(),
            in_flight: self.in_flight.len(),
            max_queue_depth: self.queue.max_depth(),
            overflow_count: self.queue.overflow_count(),
            last_delivered_seq: self.last_delivered_seq,
            last_assigned_seq: self.last_assigned_seq,
        }
    }
}

fn lock(cell: &Mutex<RecipientState>) -> MutexGuard<'_, RecipientState> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Owner of every recipient's state.
///
/// The table lock is only held to look up (or create) a recipient's cell;
/// all mutation happens under that recipient's own mutex, so operations on
/// different recipients never wait on each other.
pub struct DeliveryRouter {
    recipients: DashMap<RecipientId, Arc<Mutex<RecipientState>>>,
    retained: DashMap<RecipientId, RetainedMarks>,
    settings: RouterSettings,
    log: EventLog,
}

impl DeliveryRouter {
    pub fn new(settings: RouterSettings, log: EventLog) -> Self {
        Self {
            recipients: DashMap::new(),
            retained: DashMap::new(),
            settings,
            log,
        }
    }

    /// Number of recipients with live state.
    pub fn recipient_count(&self) -> usize {
        self.recipients.len()
    }

    fn cell(&self, id: &RecipientId) -> Arc<Mutex<RecipientState>> {
        if let Some(cell) = self.recipients.get(id) {
            return Arc::clone(cell.value());
        }
        // Expired marks are read back outside the shard lock.
        let recorded = if self.retained.contains_key(id) {
            None
        } else {
            self.log.recorded_marks(id)
        };
        let entry = self.recipients.entry(id.clone()).or_insert_with(|| {
            let marks = self
                .retained
                .remove(id)
                .map(|(_, retained)| retained.marks)
                .or(recorded)
                .unwrap_or_default();
            debug!(recipient = %id, last_assigned = marks.last_assigned, "recipient created");
            Arc::new(Mutex::new(RecipientState::new(
                id.clone(),
                marks,
                self.settings.max_queue_depth,
            )))
        });
        Arc::clone(entry.value())
    }

    fn existing(&self, id: &RecipientId) -> Option<Arc<Mutex<RecipientState>>> {
        self.recipients.get(id).map(|cell| Arc::clone(cell.value()))
    }

    /// Run `f` under the recipient's lock, creating the recipient if needed.
    fn with_state<R>(&self, id: &RecipientId, f: impl FnOnce(&mut RecipientState) -> R) -> R {
        loop {
            let cell = self.cell(id);
            let mut state = lock(&cell);
            if state.retired {
                continue;
            }
            return f(&mut state);
        }
    }

    fn with_existing<R>(
        &self,
        id: &RecipientId,
        f: impl FnOnce(&mut RecipientState) -> R,
    ) -> Option<R> {
        loop {
            let cell = self.existing(id)?;
            let mut state = lock(&cell);
            if state.retired {
                continue;
            }
            return Some(f(&mut state));
        }
    }

    /// Marks of a recipient without live state: retained in memory, else
    /// read back from the log.
    fn known_marks(&self, id: &RecipientId) -> SequenceMarks {
        self.retained
            .get(id)
            .map(|retained| retained.marks)
            .or_else(|| self.log.recorded_marks(id))
            .unwrap_or_default()
    }

    // -- producer side ------------------------------------------------------

    /// Assign the next sequence and deliver or queue the envelope.
    ///
    /// Never blocks on I/O and never reports failure to the producer; `None`
    /// means the payload could not be encoded and was logged.
    pub fn submit(&self, id: &RecipientId, payload: EventPayload) -> Option<Receipt> {
        let created_at = Utc::now();
        self.with_state(id, |state| self.sequence_and_route(state, payload, created_at))
    }

    /// Submit envelopes produced by several sources at once, ordered by
    /// `created_at` then source registration order.
    pub fn submit_batch(&self, id: &RecipientId, mut batch: Vec<Submission>) -> Vec<Receipt> {
        batch.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.source.cmp(&b.source))
        });
        self.with_state(id, |state| {
            batch
                .into_iter()
                .filter_map(|entry| self.sequence_and_route(state, entry.payload, entry.created_at))
                .collect()
        })
    }

    fn sequence_and_route(
        &self,
        state: &mut RecipientState,
        payload: EventPayload,
        created_at: DateTime<Utc>,
    ) -> Option<Receipt> {
        let seq = state.last_assigned_seq + 1;
        let envelope = match EventEnvelope::seal(seq, payload, created_at) {
            Ok(envelope) => Arc::new(envelope),
            Err(e) => {
                error!(recipient = %state.id, seq, "failed to encode envelope: {e}");
                return None;
            }
        };
        state.last_assigned_seq = seq;
        self.log.append(&state.id, &envelope);
        let routing = self.route(state, envelope);
        trace!(recipient = %state.id, seq, ?routing, "envelope submitted");
        Some(Receipt {
            sequence: seq,
            routing,
        })
    }

    fn route(&self, state: &mut RecipientState, envelope: Arc<EventEnvelope>) -> Routing {
        let offered = match &state.connection {
            None => Err(QueueReason::ChannelUnavailable),
            Some(_) if !state.queue.is_empty() => Err(QueueReason::Backlog),
            Some(_) if state.in_flight.len() >= self.settings.max_in_flight => {
                Err(QueueReason::WindowFull)
            }
            Some(conn) => conn.offer(Arc::clone(&envelope)).map_err(|e| {
                warn!(
                    recipient = %state.id,
                    connection = %conn.id(),
                    seq = envelope.sequence(),
                    "push failed, falling back to queue: {e}"
                );
                QueueReason::PushFailed
            }),
        };

        match offered {
            Ok(()) => {
                state.in_flight.push_back(envelope);
                Routing::Pushed
            }
            Err(reason) => {
                if reason == QueueReason::PushFailed {
                    self.detach(state);
                }
                self.enqueue(state, envelope);
                Routing::Queued(reason)
            }
        }
    }

    fn enqueue(&self, state: &mut RecipientState, envelope: Arc<EventEnvelope>) {
        let evicted = state.queue.enqueue(envelope);
        self.report_overflow(state, &evicted);
    }

    fn report_overflow(&self, state: &RecipientState, evicted: &[Arc<EventEnvelope>]) {
        for envelope in evicted {
            warn!(
                recipient = %state.id,
                seq = envelope.sequence(),
                overflow_count = state.queue.overflow_count(),
                max_queue_depth = state.queue.max_depth(),
                "queue overflow: evicted oldest undelivered envelope"
            );
        }
    }

    /// Drop the live connection and put its unconfirmed envelopes back in
    /// the queue.
    fn detach(&self, state: &mut RecipientState) -> Option<ConnectionHandle> {
        let conn = state.connection.take()?;
        conn.force_close();
        let unconfirmed: Vec<_> = state.in_flight.drain(..).collect();
        if !unconfirmed.is_empty() {
            debug!(
                recipient = %state.id,
                connection = %conn.id(),
                count = unconfirmed.len(),
                "re-queueing unconfirmed envelopes"
            );
        }
        let evicted = state.queue.restore(unconfirmed);
        self.report_overflow(state, &evicted);
        Some(conn)
    }

    /// Move queued envelopes onto the live connection while the window has
    /// room. Returns how many were handed over.
    fn pump(&self, state: &mut RecipientState) -> usize {
        let Some(conn) = state.connection.clone() else {
            return 0;
        };
        let mut moved = 0;
        while state.in_flight.len() < self.settings.max_in_flight {
            let Some(next) = state.queue.pop_front() else {
                break;
            };
            match conn.offer(Arc::clone(&next)) {
                Ok(()) => {
                    state.in_flight.push_back(next);
                    moved += 1;
                }
                Err(e) => {
                    warn!(
                        recipient = %state.id,
                        connection = %conn.id(),
                        seq = next.sequence(),
                        "drain failed, connection dropped: {e}"
                    );
                    let evicted = state.queue.restore([next]);
                    self.report_overflow(state, &evicted);
                    self.detach(state);
                    break;
                }
            }
        }
        moved
    }

    // -- connection side ----------------------------------------------------

    /// Mark the recipient live on `handle` and drain its queue onto it.
    ///
    /// Any older connection is force-closed first; its unconfirmed envelopes
    /// are re-queued ahead of the drain.
    pub fn register_connection(
        &self,
        id: &RecipientId,
        handle: ConnectionHandle,
    ) -> RegisterOutcome {
        self.with_state(id, |state| {
            let superseded = self.detach(state).map(|old| old.id());
            if let Some(old) = superseded {
                info!(recipient = %id, old = %old, new = %handle.id(), "connection superseded");
            }
            let connection = handle.id();
            state.connection = Some(handle);
            state.present = true;
            state.touch();
            let drained = self.pump(state);
            info!(
                recipient = %id,
                %connection,
                drained,
                pending = state.queue.len(),
                "push connection registered"
            );
            RegisterOutcome {
                superseded,
                drained,
                pending: state.queue.len(),
            }
        })
    }

    /// Mark the recipient offline if `connection` is still its live one.
    /// A superseded connection unregistering is a no-op.
    pub fn unregister_connection(&self, id: &RecipientId, connection: ConnectionId) -> bool {
        self.with_existing(id, |state| {
            if !state.is_current(connection) {
                return false;
            }
            self.detach(state);
            state.touch();
            info!(
                recipient = %id,
                %connection,
                queued = state.queue.len(),
                "push connection closed"
            );
            true
        })
        .unwrap_or(false)
    }

    /// Record that the connection wrote every in-flight envelope up to `seq`.
    pub fn confirm_sent(&self, id: &RecipientId, connection: ConnectionId, seq: u64) -> bool {
        self.with_existing(id, |state| {
            if !state.is_current(connection) {
                trace!(
                    recipient = %id,
                    %connection,
                    seq,
                    "ignoring confirmation from stale connection"
                );
                return false;
            }
            let mut confirmed = false;
            while state
                .in_flight
                .front()
                .is_some_and(|envelope| envelope.sequence() <= seq)
            {
                state.in_flight.pop_front();
                confirmed = true;
            }
            if seq > state.last_delivered_seq {
                state.last_delivered_seq = seq;
                self.log.delivered(&state.id, seq);
            }
            self.pump(state);
            confirmed
        })
        .unwrap_or(false)
    }

    // -- client side --------------------------------------------------------

    /// Register presence. Does not open a push connection.
    pub fn connect(&self, id: &RecipientId) -> QueueSnapshot {
        self.with_state(id, |state| {
            state.present = true;
            state.touch();
            state.snapshot()
        })
    }

    /// Explicit teardown: presence cleared, live connection closed.
    pub fn disconnect(&self, id: &RecipientId) -> QueueSnapshot {
        self.with_state(id, |state| {
            state.present = false;
            if let Some(conn) = self.detach(state) {
                info!(
                    recipient = %id,
                    connection = %conn.id(),
                    "push connection closed by disconnect"
                );
            }
            state.touch();
            state.snapshot()
        })
    }

    /// Queued envelopes after `since_seq` together with the current snapshot.
    pub fn read_since(
        &self,
        id: &RecipientId,
        since_seq: u64,
    ) -> Result<(Vec<Arc<EventEnvelope>>, QueueSnapshot), DeliveryError> {
        let read = self.with_existing(id, |state| {
            check_sequence(since_seq, state.last_assigned_seq)?;
            state.touch();
            Ok((state.queue.drain(since_seq), state.snapshot()))
        });
        match read {
            Some(result) => result,
            None => {
                let marks = self.known_marks(id);
                check_sequence(since_seq, marks.last_assigned)?;
                Ok((Vec::new(), unknown_snapshot(id, marks, self.settings)))
            }
        }
    }

    /// Retire everything up to `up_to_seq`, queued or in flight.
    ///
    /// For a collected recipient only the delivered mark moves; its
    /// archived envelopes stay in the log but are no longer recovered.
    pub fn acknowledge(
        &self,
        id: &RecipientId,
        up_to_seq: u64,
    ) -> Result<AckOutcome, DeliveryError> {
        loop {
            if let Some(result) = self.acknowledge_live(id, up_to_seq) {
                return result;
            }
            if let Some(mut retained) = self.retained.get_mut(id) {
                return self.advance_marks(id, &mut retained.marks, up_to_seq);
            }
            if self.recipients.contains_key(id) {
                continue;
            }
            let mut marks = self.log.recorded_marks(id).unwrap_or_default();
            let outcome = self.advance_marks(id, &mut marks, up_to_seq)?;
            if !outcome.stale {
                self.retained
                    .entry(id.clone())
                    .or_insert_with(|| RetainedMarks::new(marks));
            }
            return Ok(outcome);
        }
    }

    fn acknowledge_live(
        &self,
        id: &RecipientId,
        up_to_seq: u64,
    ) -> Option<Result<AckOutcome, DeliveryError>> {
        self.with_existing(id, |state| {
            check_sequence(up_to_seq, state.last_assigned_seq)?;
            state.touch();
            if up_to_seq <= state.last_delivered_seq {
                debug!(recipient = %id, up_to_seq, "stale acknowledge ignored");
                return Ok(AckOutcome {
                    retired: 0,
                    stale: true,
                    last_delivered_seq: state.last_delivered_seq,
                });
            }
            let mut retired = state.queue.acknowledge(up_to_seq);
            let before = state.in_flight.len();
            state.in_flight.retain(|envelope| envelope.sequence() > up_to_seq);
            retired += before - state.in_flight.len();
            state.last_delivered_seq = up_to_seq;
            self.log.delivered(&state.id, up_to_seq);
            self.pump(state);
            Ok(AckOutcome {
                retired,
                stale: false,
                last_delivered_seq: up_to_seq,
            })
        })
    }

    fn advance_marks(
        &self,
        id: &RecipientId,
        marks: &mut SequenceMarks,
        up_to_seq: u64,
    ) -> Result<AckOutcome, DeliveryError> {
        check_sequence(up_to_seq, marks.last_assigned)?;
        if up_to_seq <= marks.last_delivered {
            return Ok(AckOutcome {
                retired: 0,
                stale: true,
                last_delivered_seq: marks.last_delivered,
            });
        }
        marks.last_delivered = up_to_seq;
        self.log.delivered(id, up_to_seq);
        debug!(recipient = %id, up_to_seq, "acknowledged envelopes of a collected recipient");
        Ok(AckOutcome {
            retired: 0,
            stale: false,
            last_delivered_seq: up_to_seq,
        })
    }

    pub fn snapshot(&self, id: &RecipientId) -> QueueSnapshot {
        self.with_existing(id, |state| state.snapshot())
            .unwrap_or_else(|| unknown_snapshot(id, self.known_marks(id), self.settings))
    }

    // -- maintenance --------------------------------------------------------

    /// Re-create a recipient from the envelope log after a restart.
    /// Returns the number of envelopes evicted by the depth bound.
    pub fn restore_recipient(
        &self,
        id: RecipientId,
        marks: SequenceMarks,
        undelivered: Vec<Arc<EventEnvelope>>,
    ) -> usize {
        if undelivered.is_empty() {
            self.retained.insert(id, RetainedMarks::new(marks));
            return 0;
        }
        let mut state = RecipientState::new(id.clone(), marks, self.settings.max_queue_depth);
        let evicted = state.queue.restore(undelivered);
        self.report_overflow(&state, &evicted);
        info!(
            recipient = %id,
            queued = state.queue.len(),
            last_assigned = marks.last_assigned,
            "recipient restored"
        );
        self.recipients.insert(id, Arc::new(Mutex::new(state)));
        evicted.len()
    }

    /// Remove recipients that have been idle for the configured timeout with
    /// no connection and an empty or stale queue.
    pub fn collect_idle(&self) -> Vec<CollectedRecipient> {
        let now = Instant::now();
        let wall = Utc::now();
        let idle = self.settings.idle_timeout;

        let candidates: Vec<RecipientId> = self
            .recipients
            .iter()
            .filter(|entry| lock(entry.value()).is_collectable(now, wall, idle))
            .map(|entry| entry.key().clone())
            .collect();

        let mut collected = Vec::new();
        for id in candidates {
            let mut removed = None;
            self.recipients.remove_if(&id, |key, cell| {
                let mut state = lock(cell);
                if !state.is_collectable(now, wall, idle) {
                    return false;
                }
                state.retired = true;
                let marks = state.marks();
                self.retained.insert(key.clone(), RetainedMarks::new(marks));
                removed = Some(CollectedRecipient {
                    recipient_id: key.clone(),
                    undelivered: state.queue.len(),
                    marks,
                });
                true
            });
            if let Some(entry) = removed {
                if entry.undelivered > 0 {
                    warn!(
                        recipient = %entry.recipient_id,
                        undelivered = entry.undelivered,
                        "collected idle recipient with undelivered envelopes; kept in log"
                    );
                } else {
                    debug!(recipient = %entry.recipient_id, "collected idle recipient");
                }
                collected.push(entry);
            }
        }
        collected
    }

    /// Forget retained marks set aside at least `max_age` ago. They stay in
    /// the log's `recipient_marks` table and are read back on next use, so
    /// nothing is dropped while no log is attached.
    pub fn expire_retained(&self, max_age: Duration) -> usize {
        if !self.log.is_attached() {
            return 0;
        }
        let now = Instant::now();
        let before = self.retained.len();
        self.retained
            .retain(|_, retained| now.duration_since(retained.since) < max_age);
        let expired = before.saturating_sub(self.retained.len());
        if expired > 0 {
            debug!(expired, "expired retained sequence marks");
        }
        expired
    }

    /// Number of collected recipients whose marks are held in memory.
    pub fn retained_count(&self) -> usize {
        self.retained.len()
    }
}

fn check_sequence(seq: u64, last_assigned: u64) -> Result<(), DeliveryError> {
    if seq > last_assigned {
        return Err(DeliveryError::InvalidSequence { seq, last_assigned });
    }
    Ok(())
}

fn unknown_snapshot(
    id: &RecipientId,
    marks: SequenceMarks,
    settings: RouterSettings,
) -> QueueSnapshot {
    QueueSnapshot {
        recipient_id: id.clone(),
        phase: RecipientPhase::Unknown,
        present: false,
        queued: 0,
        in_flight: 0,
        max_queue_depth: settings.max_queue_depth.max(1),
        overflow_count: 0,
        last_delivered_seq: marks.last_delivered,
        last_assigned_seq: marks.last_assigned,
    }
}
