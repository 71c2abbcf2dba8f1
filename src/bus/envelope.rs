use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

use super::event_types::*;
use super::DeliveryError;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProcessEvent,
    SessionEvent,
    Notification,
    SyncRequest,
}

impl EventKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessEvent => KIND_PROCESS_EVENT,
            Self::SessionEvent => KIND_SESSION_EVENT,
            Self::Notification => KIND_NOTIFICATION,
            Self::SyncRequest => KIND_SYNC_REQUEST,
        }
    }

    /// Name of the wire field that carries the subtype for this kind.
    pub const fn subtype_field(&self) -> &'static str {
        match self {
            Self::SyncRequest => FIELD_DATA_TYPE,
            _ => FIELD_EVENT_TYPE,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DeliveryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            KIND_PROCESS_EVENT | "processevent" => Ok(Self::ProcessEvent),
            KIND_SESSION_EVENT | "sessionevent" => Ok(Self::SessionEvent),
            KIND_NOTIFICATION => Ok(Self::Notification),
            KIND_SYNC_REQUEST | "syncrequest" => Ok(Self::SyncRequest),
            _ => Err(DeliveryError::InvalidPayload(format!("unknown event kind: {value}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceClose {
    pub reason: String,
    #[serde(default)]
    pub pids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub child_profile: String,
    #[serde(default)]
    pub time_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLimit {
    pub child_profile: String,
    pub limit_minutes: u32,
    #[serde(default)]
    pub elapsed_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesktopNotice {
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSync {
    pub session_data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum ProcessEvent {
    RobloxStarted(ProcessInfo),
    RobloxStopped(ProcessInfo),
    RobloxForceClosed(ForceClose),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted(SessionRecord),
    SessionEnded(SessionRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    TimeLimitWarning(TimeLimit),
    TimeLimitExceeded(TimeLimit),
    Desktop(DesktopNotice),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "data_type", content = "data", rename_all = "snake_case")]
pub enum SyncRequest {
    SessionData(SessionSync),
}

/// One notification body, tagged by kind and subtype.
///
/// Serializes to the `{event_type|data_type, data}` half of the wire record;
/// the envelope adds `seq`, `type` and `timestamp` around it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Process(ProcessEvent),
    Session(SessionEvent),
    Notification(Notification),
    Sync(SyncRequest),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Process(_) => EventKind::ProcessEvent,
            Self::Session(_) => EventKind::SessionEvent,
            Self::Notification(_) => EventKind::Notification,
            Self::Sync(_) => EventKind::SyncRequest,
        }
    }

    pub fn subtype(&self) -> &'static str {
        match self {
            Self::Process(ProcessEvent::RobloxStarted(_)) => PROCESS_ROBLOX_STARTED,
            Self::Process(ProcessEvent::RobloxStopped(_)) => PROCESS_ROBLOX_STOPPED,
            Self::Process(ProcessEvent::RobloxForceClosed(_)) => PROCESS_ROBLOX_FORCE_CLOSED,
            Self::Session(SessionEvent::SessionStarted(_)) => SESSION_STARTED,
            Self::Session(SessionEvent::SessionEnded(_)) => SESSION_ENDED,
            Self::Notification(Notification::TimeLimitWarning(_)) => {
                NOTIFICATION_TIME_LIMIT_WARNING
            }
            Self::Notification(Notification::TimeLimitExceeded(_)) => {
                NOTIFICATION_TIME_LIMIT_EXCEEDED
            }
            Self::Notification(Notification::Desktop(_)) => NOTIFICATION_DESKTOP,
            Self::Sync(SyncRequest::SessionData(_)) => SYNC_SESSION_DATA,
        }
    }

    /// Build a payload from the boundary triple `(kind, subtype, data)`.
    pub fn from_parts(kind: EventKind, subtype: &str, data: Value) -> Result<Self, DeliveryError> {
        let mut tagged = Map::new();
        tagged.insert(kind.subtype_field().to_string(), Value::String(subtype.to_string()));
        tagged.insert("data".to_string(), data);
        let tagged = Value::Object(tagged);

        let parsed = match kind {
            EventKind::ProcessEvent => serde_json::from_value(tagged).map(Self::Process),
            EventKind::SessionEvent => serde_json::from_value(tagged).map(Self::Session),
            EventKind::Notification => serde_json::from_value(tagged).map(Self::Notification),
            EventKind::SyncRequest => serde_json::from_value(tagged).map(Self::Sync),
        };
        parsed.map_err(|e| DeliveryError::InvalidPayload(format!("{kind}/{subtype}: {e}")))
    }
}

impl From<ProcessEvent> for EventPayload {
    fn from(value: ProcessEvent) -> Self {
        Self::Process(value)
    }
}

impl From<SessionEvent> for EventPayload {
    fn from(value: SessionEvent) -> Self {
        Self::Session(value)
    }
}

impl From<Notification> for EventPayload {
    fn from(value: Notification) -> Self {
        Self::Notification(value)
    }
}

impl From<SyncRequest> for EventPayload {
    fn from(value: SyncRequest) -> Self {
        Self::Sync(value)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Canonical timestamp rendering; fixed width so stored values sort lexically.
pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Serialize)]
struct WireRecord<'a> {
    seq: u64,
    #[serde(rename = "type")]
    kind: EventKind,
    #[serde(flatten)]
    payload: &'a EventPayload,
    timestamp: String,
}

#[derive(Deserialize)]
struct StoredRecord {
    seq: u64,
    #[serde(rename = "type")]
    kind: EventKind,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    data_type: Option<String>,
    #[serde(default)]
    data: Value,
    timestamp: DateTime<Utc>,
}

/// An immutable, sequenced notification.
///
/// The wire encoding is produced once when the envelope is sealed; push,
/// pull and replay all emit these exact bytes.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    sequence: u64,
    payload: EventPayload,
    created_at: DateTime<Utc>,
    wire: Box<RawValue>,
}

impl EventEnvelope {
    pub(crate) fn seal(
        sequence: u64,
        payload: EventPayload,
        created_at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let wire = serde_json::value::to_raw_value(&WireRecord {
            seq: sequence,
            kind: payload.kind(),
            payload: &payload,
            timestamp: format_timestamp(&created_at),
        })?;
        Ok(Self {
            sequence,
            payload,
            created_at,
            wire,
        })
    }

    /// Rebuild an envelope from a previously encoded record, keeping its
    /// bytes verbatim.
    pub fn from_wire(raw: &str) -> Result<Self, DeliveryError> {
        let record: StoredRecord = serde_json::from_str(raw)
            .map_err(|e| DeliveryError::InvalidPayload(format!("stored envelope: {e}")))?;
        let subtype = match record.kind {
            EventKind::SyncRequest => record.data_type,
            _ => record.event_type,
        }
        .ok_or_else(|| {
            DeliveryError::InvalidPayload(format!(
                "stored envelope {} has no {}",
                record.seq,
                record.kind.subtype_field()
            ))
        })?;
        let payload = EventPayload::from_parts(record.kind, &subtype, record.data)?;
        let wire = RawValue::from_string(raw.to_string())
            .map_err(|e| DeliveryError::InvalidPayload(format!("stored envelope: {e}")))?;
        Ok(Self {
            sequence: record.seq,
            payload,
            created_at: record.timestamp,
            wire,
        })
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    #[inline]
    pub fn subtype(&self) -> &'static str {
        self.payload.subtype()
    }

    #[inline]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The encoded record.
    #[inline]
    pub fn wire(&self) -> &RawValue {
        &self.wire
    }

    #[inline]
    pub fn wire_str(&self) -> &str {
        self.wire.get()
    }
}

impl PartialEq for EventEnvelope {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence && self.wire.get() == other.wire.get()
    }
}

impl Eq for EventEnvelope {}
