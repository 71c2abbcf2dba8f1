use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::DeliveryError;

/// Addressable client endpoint owning one ordered event stream.
///
/// Ids are 1..=128 characters drawn from `[A-Za-z0-9_.:-]`, which keeps them
/// safe to embed in socket paths and log lines without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecipientId(String);

impl RecipientId {
    pub const MAX_LEN: usize = 128;

    pub fn parse(raw: &str) -> Result<Self, DeliveryError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DeliveryError::InvalidRecipient("recipient id is empty".to_string()));
        }
        if trimmed.len() > Self::MAX_LEN {
            return Err(DeliveryError::InvalidRecipient(format!(
                "recipient id exceeds {} characters",
                Self::MAX_LEN
            )));
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')))
        {
            return Err(DeliveryError::InvalidRecipient(format!(
                "unsupported character {bad:?} in {trimmed:?}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecipientId {
    type Err = DeliveryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for RecipientId {
    type Error = DeliveryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RecipientId> for String {
    fn from(value: RecipientId) -> Self {
        value.0
    }
}
