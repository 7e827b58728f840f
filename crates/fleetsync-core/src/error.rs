//! Error types for fleetsync-core.
//!
//! Sync errors form a tagged union rather than a hierarchy. Every component
//! returns its own classified error, and the orchestrator wraps sub-errors
//! in [`SyncError::Phase`] without discarding the original classification.
//!
//! | Error | Classification | Retry on next cycle? |
//! |-------|----------------|----------------------|
//! | [`CloudError::Unauthorized`] | [`ErrorClass::Unauthorized`] | Only after re-authentication |
//! | Any other [`CloudError`] | [`ErrorClass::Cloud`] | Yes |
//! | [`StorageError`] | [`ErrorClass::Storage`] | Yes |
//! | [`SyncError::MacIdMissing`] | [`ErrorClass::MacIdMissing`] | No, the sensor is not cloud-syncable |
//! | [`SyncError::QueueIsAlreadySyncing`] | [`ErrorClass::QueueIsAlreadySyncing`] | Yes, once the running sync ends |
//! | [`SyncError::Cancelled`] | [`ErrorClass::Cancelled`] | Yes |

use serde::Serialize;
use thiserror::Error;

use crate::events::SyncPhase;

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Result type for cloud client calls.
pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// Errors reported by a cloud client.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CloudError {
    /// The cloud rejected the account credentials.
    #[error("Cloud rejected the credentials")]
    Unauthorized,

    /// The cloud could not be reached.
    #[error("Cloud not reachable at {url}: {source}")]
    NotReachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The cloud answered with an error status.
    #[error("Cloud API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A request could not be encoded.
    #[error("Invalid request payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Injected or otherwise unclassified failure.
    #[error("{0}")]
    Other(String),
}

/// Local persistence failure.
#[derive(Debug, Error)]
#[error("Storage error: {0}")]
pub struct StorageError(#[from] pub fleetsync_store::Error);

/// Errors that can occur while synchronising.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// Network or API failure.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// Local persistence failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The sensor lacks the MAC identifier required for cloud sync.
    #[error("Sensor {sensor} has no MAC identifier")]
    MacIdMissing { sensor: String },

    /// A sync for the same scope is already running.
    #[error("A sync is already in progress")]
    QueueIsAlreadySyncing,

    /// The operation was cancelled before its persistence write.
    #[error("Sync cancelled")]
    Cancelled,

    /// A sub-error raised inside an orchestrated phase.
    #[error("{phase} sync failed: {source}")]
    Phase {
        phase: SyncPhase,
        #[source]
        source: Box<SyncError>,
    },
}

/// Flat classification of a [`SyncError`], stable across wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Cloud,
    Unauthorized,
    Storage,
    MacIdMissing,
    QueueIsAlreadySyncing,
    Cancelled,
}

impl From<fleetsync_store::Error> for SyncError {
    fn from(err: fleetsync_store::Error) -> Self {
        Self::Storage(StorageError(err))
    }
}

impl SyncError {
    /// Wrap this error as having happened in `phase`.
    ///
    /// An error already attributed to a phase is returned unchanged.
    pub fn in_phase(self, phase: SyncPhase) -> Self {
        match self {
            Self::Phase { .. } => self,
            other => Self::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with every phase wrapper removed.
    pub fn root(&self) -> &SyncError {
        match self {
            Self::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classification of the innermost error.
    pub fn classification(&self) -> ErrorClass {
        match self {
            Self::Phase { source, .. } => source.classification(),
            Self::Cloud(CloudError::Unauthorized) => ErrorClass::Unauthorized,
            Self::Cloud(_) => ErrorClass::Cloud,
            Self::Storage(_) => ErrorClass::Storage,
            Self::MacIdMissing { .. } => ErrorClass::MacIdMissing,
            Self::QueueIsAlreadySyncing => ErrorClass::QueueIsAlreadySyncing,
            Self::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// Whether the cloud rejected the credentials.
    pub fn is_unauthorized(&self) -> bool {
        self.classification() == ErrorClass::Unauthorized
    }

    pub(crate) fn mac_id_missing(sensor: impl Into<String>) -> Self {
        Self::MacIdMissing {
            sensor: sensor.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_survives_phase_wrapping() {
        let err = SyncError::Cloud(CloudError::Unauthorized).in_phase(SyncPhase::History);
        assert!(matches!(err, SyncError::Phase { .. }));
        assert_eq!(err.classification(), ErrorClass::Unauthorized);
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_in_phase_does_not_double_wrap() {
        let err = SyncError::Cancelled
            .in_phase(SyncPhase::History)
            .in_phase(SyncPhase::Latest);
        match err {
            SyncError::Phase { phase, source } => {
                assert_eq!(phase, SyncPhase::History);
                assert!(matches!(*source, SyncError::Cancelled));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: SyncError = fleetsync_store::Error::MissingIdentity.into();
        assert_eq!(err.classification(), ErrorClass::Storage);
        assert!(!err.is_unauthorized());
        assert!(err.to_string().contains("Storage error"));
    }

    #[test]
    fn test_phase_display_names_the_phase() {
        let err = SyncError::mac_id_missing("luid-1").in_phase(SyncPhase::History);
        assert_eq!(
            err.to_string(),
            "history sync failed: Sensor luid-1 has no MAC identifier"
        );
    }
}
