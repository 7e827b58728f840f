//! Timestamp-based collision resolution.
//!
//! A collision is a conflict between a local and a cloud value of the same
//! entity. It is settled by comparing when each side last changed, with a
//! tolerance that absorbs clock skew between the device and the cloud.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Default clock-skew tolerance.
pub const DEFAULT_TOLERANCE: Duration = Duration::seconds(1);

/// Outcome of a collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The cloud value wins; overwrite the local one.
    UpdateLocal,
    /// The local value wins; keep it and queue it for upload.
    KeepLocalAndQueue,
    /// Both sides agree (within tolerance).
    NoAction,
}

/// How to resolve a collision where neither side carries a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BothAbsent {
    /// Nothing is tracked yet, leave both sides alone.
    #[default]
    NoAction,
    /// Treat untracked legacy data as stale and take the cloud value.
    UpdateLocal,
}

/// Pure resolver for `(local, cloud)` timestamp pairs.
///
/// # Example
///
/// ```
/// use fleetsync_core::{CollisionResolver, Resolution};
/// use time::{Duration, OffsetDateTime};
///
/// let resolver = CollisionResolver::default();
/// let t = OffsetDateTime::now_utc();
///
/// assert_eq!(resolver.resolve(Some(t), Some(t + Duration::milliseconds(500))), Resolution::NoAction);
/// assert_eq!(resolver.resolve(Some(t), Some(t + Duration::seconds(2))), Resolution::UpdateLocal);
/// assert_eq!(resolver.resolve(Some(t), None), Resolution::KeepLocalAndQueue);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionResolver {
    tolerance: Duration,
    both_absent: BothAbsent,
}

impl Default for CollisionResolver {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl CollisionResolver {
    /// Create a resolver with the given skew tolerance.
    ///
    /// A negative tolerance is treated as its absolute value.
    pub fn new(tolerance: Duration) -> Self {
        Self {
            tolerance: tolerance.abs(),
            both_absent: BothAbsent::NoAction,
        }
    }

    /// Set the policy for pairs where both timestamps are absent.
    #[must_use]
    pub fn with_both_absent(mut self, policy: BothAbsent) -> Self {
        self.both_absent = policy;
        self
    }

    /// The skew tolerance.
    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Resolve a collision.
    pub fn resolve(
        &self,
        local: Option<OffsetDateTime>,
        cloud: Option<OffsetDateTime>,
    ) -> Resolution {
        match (local, cloud) {
            (None, None) => match self.both_absent {
                BothAbsent::NoAction => Resolution::NoAction,
                BothAbsent::UpdateLocal => Resolution::UpdateLocal,
            },
            (Some(_), None) => Resolution::KeepLocalAndQueue,
            (None, Some(_)) => Resolution::UpdateLocal,
            (Some(local), Some(cloud)) => {
                if (cloud - local).abs() < self.tolerance {
                    Resolution::NoAction
                } else if cloud > local {
                    Resolution::UpdateLocal
                } else {
                    Resolution::KeepLocalAndQueue
                }
            }
        }
    }
}

/// Resolve with the default tolerance and both-absent policy.
pub fn resolve(local: Option<OffsetDateTime>, cloud: Option<OffsetDateTime>) -> Resolution {
    CollisionResolver::default().resolve(local, cloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const T: OffsetDateTime = datetime!(2024-05-01 08:00:00 UTC);

    #[test]
    fn test_both_absent_policies() {
        assert_eq!(resolve(None, None), Resolution::NoAction);
        let fleet = CollisionResolver::default().with_both_absent(BothAbsent::UpdateLocal);
        assert_eq!(fleet.resolve(None, None), Resolution::UpdateLocal);
    }

    #[test]
    fn test_one_side_absent() {
        assert_eq!(resolve(Some(T), None), Resolution::KeepLocalAndQueue);
        assert_eq!(resolve(None, Some(T)), Resolution::UpdateLocal);
    }

    #[test]
    fn test_tolerance_boundary_is_exclusive() {
        assert_eq!(
            resolve(Some(T), Some(T + Duration::seconds(1))),
            Resolution::UpdateLocal
        );
        assert_eq!(
            resolve(Some(T), Some(T + Duration::milliseconds(999))),
            Resolution::NoAction
        );
    }

    #[test]
    fn test_custom_tolerance() {
        let resolver = CollisionResolver::new(Duration::seconds(-5));
        assert_eq!(resolver.tolerance(), Duration::seconds(5));
        assert_eq!(
            resolver.resolve(Some(T), Some(T + Duration::seconds(3))),
            Resolution::NoAction
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn timestamp() -> impl Strategy<Value = OffsetDateTime> {
            (0i64..4_000_000_000_000).prop_map(|ms| {
                OffsetDateTime::UNIX_EPOCH + Duration::milliseconds(ms)
            })
        }

        proptest! {
            #[test]
            fn resolve_is_total_and_deterministic(
                local in proptest::option::of(timestamp()),
                cloud in proptest::option::of(timestamp()),
            ) {
                prop_assert_eq!(resolve(local, cloud), resolve(local, cloud));
            }

            #[test]
            fn equal_timestamps_need_no_action(t in timestamp()) {
                prop_assert_eq!(resolve(Some(t), Some(t)), Resolution::NoAction);
            }

            #[test]
            fn half_second_skew_needs_no_action(t in timestamp()) {
                let cloud = t + Duration::milliseconds(500);
                prop_assert_eq!(resolve(Some(t), Some(cloud)), Resolution::NoAction);
                prop_assert_eq!(resolve(Some(cloud), Some(t)), Resolution::NoAction);
            }

            #[test]
            fn newer_cloud_updates_local(t in timestamp()) {
                let later = t + Duration::milliseconds(1500);
                prop_assert_eq!(resolve(Some(t), Some(later)), Resolution::UpdateLocal);
                prop_assert_eq!(resolve(Some(later), Some(t)), Resolution::KeepLocalAndQueue);
            }

            #[test]
            fn outcome_is_antisymmetric_outside_tolerance(a in timestamp(), b in timestamp()) {
                prop_assume!((a - b).abs() >= DEFAULT_TOLERANCE);
                let forward = resolve(Some(a), Some(b));
                let backward = resolve(Some(b), Some(a));
                prop_assert_ne!(forward, backward);
                prop_assert_ne!(forward, Resolution::NoAction);
            }
        }
    }
}
