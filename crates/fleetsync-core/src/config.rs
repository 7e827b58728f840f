//! Sync engine configuration.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use fleetsync_types::Record;

use crate::cloud::DenseFilter;
use crate::collision::CollisionResolver;

/// How the history watermark advances after a successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPolicy {
    /// `max(previous, newest fetched record)`.
    #[default]
    LatestRecord,
    /// `max(previous, time of the sync call)`.
    SyncTime,
}

impl WatermarkPolicy {
    /// The watermark to store after persisting `fetched`.
    ///
    /// Never moves backwards. An empty fetch leaves it unchanged.
    pub fn advance(
        self,
        previous: Option<OffsetDateTime>,
        fetched: &[Record],
        now: OffsetDateTime,
    ) -> Option<OffsetDateTime> {
        let newest = fetched.iter().map(|record| record.date).max();
        let candidate = match self {
            WatermarkPolicy::LatestRecord => newest,
            WatermarkPolicy::SyncTime => newest.map(|_| now),
        };

        match (previous, candidate) {
            (Some(previous), Some(candidate)) => Some(previous.max(candidate)),
            (previous, candidate) => candidate.or(previous),
        }
    }
}

/// Sync engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of concurrent history backfills.
    pub queue_capacity: usize,
    /// Clock-skew tolerance for collision resolution, in milliseconds.
    pub collision_tolerance_ms: u64,
    /// How far back a never-synced sensor's history is fetched, in days.
    pub history_window_days: u32,
    /// Watermark advancement policy.
    pub watermark: WatermarkPolicy,
    /// Capacity of the event channel.
    pub event_capacity: usize,
    /// Which sensors the dense endpoint returns.
    pub dense_filter: DenseFilter,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 3,
            collision_tolerance_ms: 1000,
            history_window_days: 10,
            watermark: WatermarkPolicy::default(),
            event_capacity: 100,
            dense_filter: DenseFilter::default(),
        }
    }
}

impl SyncConfig {
    /// Validate the configuration, returning every problem found.
    ///
    /// Field names are prefixed with `prefix` (e.g. `sync`).
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.queue_capacity == 0 {
            errors.push(ValidationError::new(
                prefix,
                "queue_capacity",
                "must be at least 1",
            ));
        } else if self.queue_capacity > 64 {
            errors.push(ValidationError::new(
                prefix,
                "queue_capacity",
                format!("{} is too large (max 64)", self.queue_capacity),
            ));
        }

        if self.collision_tolerance_ms > 60_000 {
            errors.push(ValidationError::new(
                prefix,
                "collision_tolerance_ms",
                "must not exceed one minute",
            ));
        }

        if self.history_window_days == 0 {
            errors.push(ValidationError::new(
                prefix,
                "history_window_days",
                "must be at least 1",
            ));
        }

        if self.event_capacity == 0 {
            errors.push(ValidationError::new(
                prefix,
                "event_capacity",
                "must be at least 1",
            ));
        }

        errors
    }

    /// Collision resolver using the configured tolerance.
    pub fn resolver(&self) -> CollisionResolver {
        CollisionResolver::new(Duration::milliseconds(
            i64::try_from(self.collision_tolerance_ms).unwrap_or(i64::MAX),
        ))
    }

    /// Fallback watermark for sensors that were never synced.
    pub fn initial_watermark(&self, now: OffsetDateTime) -> OffsetDateTime {
        now - Duration::days(i64::from(self.history_window_days))
    }
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `sync.queue_capacity`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(prefix: &str, field: &str, message: impl Into<String>) -> Self {
        let field = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
