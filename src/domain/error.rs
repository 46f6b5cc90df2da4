use thiserror::Error;

/// Core domain errors
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The coordination store could not be reached or rejected a command
    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// The system of record failed (distinct from a not-found result)
    #[error("Backing store error: {message}")]
    Backing { message: String },

    /// An exclusive section could not obtain its lock in time
    #[error("Resource busy: {resource}")]
    Busy { resource: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn backing(message: impl Into<String>) -> Self {
        Self::Backing {
            message: message.into(),
        }
    }

    pub fn busy(resource: impl Into<String>) -> Self {
        Self::Busy {
            resource: resource.into(),
        }
    }

    /// Whether this error means the coordination store is unavailable
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error() {
        let error = DomainError::store("connection refused");
        assert_eq!(error.to_string(), "Store error: connection refused");
        assert!(error.is_store_unavailable());
    }

    #[test]
    fn test_busy_error() {
        let error = DomainError::busy("event:1");
        assert_eq!(error.to_string(), "Resource busy: event:1");
        assert!(!error.is_store_unavailable());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let error: DomainError = err.into();
        assert!(matches!(error, DomainError::Serialization { .. }));
    }
}
