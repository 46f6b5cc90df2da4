//! Store infrastructure - Key-value store implementations

mod factory;
mod in_memory;
mod redis;

pub use factory::{StoreConfig, StoreFactory, StoreType};
pub use in_memory::{InMemoryStore, InMemoryStoreConfig};
pub use redis::{RedisStore, RedisStoreConfig};

use regex::Regex;

use crate::domain::DomainError;

/// Compiles a Redis-style glob (`*`, `?`) into an anchored regex
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex, DomainError> {
    let mut expression = String::with_capacity(pattern.len() + 8);
    expression.push('^');

    for ch in pattern.chars() {
        match ch {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }

    expression.push('$');

    Regex::new(&expression).map_err(|e| DomainError::validation(format!("Invalid pattern: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_matching() {
        let regex = glob_to_regex("user:*:profile").unwrap();

        assert!(regex.is_match("user:1:profile"));
        assert!(regex.is_match("user:abc:profile"));
        assert!(!regex.is_match("user:1:profile:extra"));
        assert!(!regex.is_match("other:key"));
    }

    #[test]
    fn test_glob_escapes_regex_syntax() {
        let regex = glob_to_regex("post.(1)?").unwrap();

        assert!(regex.is_match("post.(1)x"));
        assert!(!regex.is_match("postx(1)x"));
    }
}
