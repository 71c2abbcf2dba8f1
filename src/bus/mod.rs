//! Event delivery core.
//!
//! Producers hand typed notifications to the [`DeliveryRouter`], which
//! stamps each one with the recipient's next sequence number and either
//! pushes it over a live connection or parks it in the recipient's bounded
//! queue.
//!
//! # Architecture
//!
//! Envelopes flow from producer → DeliveryRouter → PushChannel or RecipientQueue:
//! - `DeliveryRouter`: per-recipient state, sequencing and routing decisions
//! - `PushChannel`: drives one live connection; drains the queue on attach
//! - `PullChannel`: poll, acknowledge and replay for clients without a socket
//! - Every envelope is also appended to the SQLite log for replay and recovery

mod envelope;
mod error;
pub mod event_types;
mod pull;
mod push;
mod queue;
mod recipient;
mod router;
mod tests;

pub use envelope::{
    DesktopNotice, EventEnvelope, EventKind, EventPayload, ForceClose, Notification, ProcessEvent,
    ProcessInfo, SessionEvent, SessionRecord, SessionSync, SyncRequest, TimeLimit,
};
pub(crate) use envelope::format_timestamp;
pub use error::DeliveryError;
pub use pull::{PollBatch, PullChannel, ReplayBatch, MAX_REPLAY};
pub use push::{
    CloseReason, ConnectionHandle, ConnectionId, ConnectionMailbox, ConnectionSummary, FrameSink,
    FrameStream, InboundFrame, PushChannel, PushError,
};
pub use queue::RecipientQueue;
pub use recipient::RecipientId;
pub use router::{
    AckOutcome, CollectedRecipient, DeliveryRouter, QueueReason, QueueSnapshot, Receipt,
    RecipientPhase, RegisterOutcome, RouterSettings, Routing, SequenceMarks, SourceOrder,
    Submission,
};
