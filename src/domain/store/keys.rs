//! Key layout shared by every coordination component

/// Derives the auxiliary keys used alongside cached entries
///
/// Tag indexes, locks and rate windows live in their own namespaces so
/// they can never collide with a cached entry key.
#[derive(Debug, Clone)]
pub struct KeySpace {
    tag_prefix: String,
    lock_prefix: String,
    rate_prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self {
            tag_prefix: "tag".to_string(),
            lock_prefix: "lock".to_string(),
            rate_prefix: "rate_limit".to_string(),
        }
    }
}

impl KeySpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the rate limit namespace
    pub fn with_rate_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.rate_prefix = prefix.into();
        self
    }

    pub fn tag_key(&self, tag: &str) -> String {
        format!("{}:{}", self.tag_prefix, tag)
    }

    pub fn lock_key(&self, resource: &str) -> String {
        format!("{}:{}", self.lock_prefix, resource)
    }

    /// Lock resource guarding a single-flight fill of `key`
    ///
    /// Kept apart from plain resource names so an exclusive section on
    /// `key` never stalls readers filling the cached entry of the same name.
    pub fn fill_resource(&self, key: &str) -> String {
        format!("fill:{}", key)
    }

    /// Lock resource guarding a background refresh, separate from the fill lock
    pub fn refresh_resource(&self, key: &str) -> String {
        format!("refresh:{}", key)
    }

    pub fn rate_window_key(&self, actor: &str, window_index: i64) -> String {
        format!("{}:{}:{}", self.rate_prefix, actor, window_index)
    }
}
