//! Lock ownership tokens

use std::fmt;

use uuid::Uuid;

/// Opaque owner token generated per acquisition attempt
///
/// Only the holder of the token that is currently stored under the lock
/// key may release the lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Generates a fresh random token
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form, enough to correlate log lines
        let short: String = self.0.chars().take(8).collect();
        write!(f, "{}", short)
    }
}
