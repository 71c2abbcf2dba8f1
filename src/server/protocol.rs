//! Control socket wire types
//!
//! One JSON request per line, one JSON response per line.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::bus::{DeliveryError, EventKind};

// =============================================================================
// Request
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Connect {
        recipient_id: String,
    },
    Disconnect {
        recipient_id: String,
    },
    Notify {
        recipient_id: String,
        kind: EventKind,
        subtype: String,
        #[serde(default)]
        data: Value,
    },
    Poll {
        recipient_id: String,
        #[serde(default)]
        since_seq: u64,
    },
    Ack {
        recipient_id: String,
        up_to_seq: u64,
    },
    Replay {
        recipient_id: String,
        #[serde(default)]
        since_seq: u64,
        #[serde(default)]
        limit: Option<usize>,
    },
    Status {
        recipient_id: String,
    },
    Health,
}

// =============================================================================
// Response
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl From<DeliveryError> for ErrorPayload {
    fn from(e: DeliveryError) -> Self {
        ErrorPayload {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

impl ErrorPayload {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: "invalid_request".to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: "internal".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok { ok: Box<RawValue> },
    Err { err: ErrorPayload },
}

impl Response {
    /// Create a success response.
    pub fn ok<T: Serialize>(payload: &T) -> Self {
        match serde_json::value::to_raw_value(payload) {
            Ok(ok) => Response::Ok { ok },
            Err(e) => {
                Response::err(ErrorPayload::internal(format!("failed to encode response: {e}")))
            }
        }
    }

    /// Create an error response.
    pub fn err(error: impl Into<ErrorPayload>) -> Self {
        Response::Err { err: error.into() }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }
}
