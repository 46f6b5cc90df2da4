//! Per-read caching options and write-side invalidation targets

use std::time::Duration;

/// How a coordinated read caches what it resolves
///
/// The TTL is the safety net; tags, an event channel and a stale
/// threshold compose on top of it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    /// Base TTL for positive entries (negative entries use a fraction of it)
    pub ttl: Duration,
    /// Tags the entry is indexed under
    pub tags: Vec<String>,
    /// Channel to announce invalidations on
    pub event_channel: Option<String>,
    /// Remaining-TTL threshold below which hits are served stale and refreshed
    pub stale_threshold: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            tags: Vec::new(),
            event_channel: None,
            stale_threshold: None,
        }
    }
}

impl CachePolicy {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_event_channel(mut self, channel: impl Into<String>) -> Self {
        self.event_channel = Some(channel.into());
        self
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = Some(threshold);
        self
    }
}

/// Cache entries a backing-store write makes obsolete
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvalidationTargets {
    pub keys: Vec<String>,
    pub tags: Vec<String>,
    /// Glob patterns, e.g. `post:*`
    pub patterns: Vec<String>,
}

impl InvalidationTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.tags.is_empty() && self.patterns.is_empty()
    }
}
