/// Input-validation failures surfaced to pull-side callers.
///
/// Delivery itself never fails from a producer's point of view: routing
/// signals (no live channel, overflow, superseded connections, stale acks)
/// are absorbed by the router and only show up in logs and counters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid recipient id: {0}")]
    InvalidRecipient(String),
    #[error("invalid sequence {seq}: last assigned sequence is {last_assigned}")]
    InvalidSequence { seq: u64, last_assigned: u64 },
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("envelope log unavailable: {0}")]
    LogUnavailable(String),
}

impl DeliveryError {
    /// Stable machine-readable code used on the control socket.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRecipient(_) => "invalid_recipient",
            Self::InvalidSequence { .. } => "invalid_sequence",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::LogUnavailable(_) => "internal",
        }
    }
}
