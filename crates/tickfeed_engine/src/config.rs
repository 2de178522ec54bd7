//! Configuration for the log follower.

use std::ops::RangeInclusive;
use std::time::Duration;
use tickfeed_protocol::{database_from_path, Tick, DEFAULT_DATABASE};

/// Delay before re-polling after an empty tail.
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(500);

/// Configuration for a [`LogFollower`](crate::LogFollower).
#[derive(Debug, Clone)]
pub struct FollowerConfig {
    /// Database whose log is followed.
    pub database: String,
    /// Delay before re-polling when the server reports no new entries.
    pub idle_backoff: Duration,
    /// Cursor to resume from. When set, the initial state fetch is skipped.
    pub start_tick: Option<Tick>,
    /// Statuses accepted as success for follow requests.
    pub follow_success: RangeInclusive<u16>,
}

impl FollowerConfig {
    /// Creates a configuration for a database.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            start_tick: None,
            follow_success: 200..=204,
        }
    }

    /// Creates a configuration from a URL path; `/` selects `_system`.
    pub fn from_database_path(path: &str) -> Self {
        Self::new(database_from_path(path))
    }

    /// Sets the empty-tail backoff.
    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    /// Resumes from a known tick instead of fetching the current position.
    pub fn with_start_tick(mut self, tick: Tick) -> Self {
        self.start_tick = Some(tick);
        self
    }

    /// Sets the statuses accepted for follow requests.
    pub fn with_follow_success(mut self, statuses: RangeInclusive<u16>) -> Self {
        self.follow_success = statuses;
        self
    }
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE)
    }
}
