//! Kind and subtype wire names.
//!
//! Single source of truth for the strings that appear in the `type`,
//! `event_type` and `data_type` fields of an encoded envelope.

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

pub const KIND_PROCESS_EVENT: &str = "process_event";
pub const KIND_SESSION_EVENT: &str = "session_event";
pub const KIND_NOTIFICATION: &str = "notification";
pub const KIND_SYNC_REQUEST: &str = "sync_request";

// ---------------------------------------------------------------------------
// Subtypes
// ---------------------------------------------------------------------------

pub const PROCESS_ROBLOX_STARTED: &str = "roblox_started";
pub const PROCESS_ROBLOX_STOPPED: &str = "roblox_stopped";
pub const PROCESS_ROBLOX_FORCE_CLOSED: &str = "roblox_force_closed";

pub const SESSION_STARTED: &str = "session_started";
pub const SESSION_ENDED: &str = "session_ended";

pub const NOTIFICATION_TIME_LIMIT_WARNING: &str = "time_limit_warning";
pub const NOTIFICATION_TIME_LIMIT_EXCEEDED: &str = "time_limit_exceeded";
pub const NOTIFICATION_DESKTOP: &str = "desktop";

pub const SYNC_SESSION_DATA: &str = "session_data";

// ---------------------------------------------------------------------------
// Subtype field names
// ---------------------------------------------------------------------------

/// Field carrying the subtype for process, session and notification kinds.
pub const FIELD_EVENT_TYPE: &str = "event_type";
/// Field carrying the subtype for sync requests.
pub const FIELD_DATA_TYPE: &str = "data_type";
