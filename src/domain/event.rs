//! Invalidation events broadcast between service instances

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// What happened to the entity behind a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationAction {
    #[default]
    Update,
    Delete,
    Invalidate,
}

impl fmt::Display for InvalidationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Invalidate => write!(f, "invalidate"),
        }
    }
}

/// Payload published on an invalidation channel
///
/// Ephemeral and best-effort: subscribers that are offline miss it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub key: String,
    #[serde(default)]
    pub action: InvalidationAction,
}

impl InvalidationEvent {
    pub fn new(key: impl Into<String>, action: InvalidationAction) -> Self {
        Self {
            key: key.into(),
            action,
        }
    }

    pub fn to_payload(&self) -> Result<String, DomainError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_payload(payload: &str) -> Result<Self, DomainError> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_format() {
        let event = InvalidationEvent::new("product:1", InvalidationAction::Delete);
        let payload = event.to_payload().unwrap();

        assert_eq!(payload, r#"{"key":"product:1","action":"delete"}"#);
        assert_eq!(InvalidationEvent::from_payload(&payload).unwrap(), event);
    }

    #[test]
    fn test_action_defaults_to_update() {
        let event = InvalidationEvent::from_payload(r#"{"key":"product:7"}"#).unwrap();
        assert_eq!(event.action, InvalidationAction::Update);
    }

    #[test]
    fn test_rejects_payload_without_key() {
        assert!(InvalidationEvent::from_payload(r#"{"product_id":7}"#).is_err());
    }
}
