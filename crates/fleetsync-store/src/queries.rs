//! Query builder for measurement history.
//!
//! [`RecordQuery`] follows the builder pattern. The sync engine uses it for
//! the `(sensor, after)` range query that finds what is already stored
//! past a watermark.
//!
//! # Example
//!
//! ```
//! use fleetsync_store::{Store, RecordQuery};
//! use fleetsync_types::SensorKey;
//! use time::{OffsetDateTime, Duration};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! let query = RecordQuery::new()
//!     .sensor(&SensorKey::from("AA:BB:CC:DD:EE:FF"))
//!     .after(yesterday)
//!     .limit(50);
//!
//! let records = store.query_records(&query)?;
//! # Ok::<(), fleetsync_store::Error>(())
//! ```

use time::OffsetDateTime;

use fleetsync_types::SensorKey;

use crate::models::{RECORD_COLUMNS, to_millis};

/// Fluent query builder for stored history records.
///
/// By default, queries return results ordered by `date` ascending
/// (oldest first), matching the append order of history.
#[derive(Debug, Default, Clone)]
pub struct RecordQuery {
    /// Filter by sensor key.
    pub sensor: Option<SensorKey>,
    /// Only records strictly after this time.
    pub after: Option<OffsetDateTime>,
    /// Only records at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by date descending.
    pub newest_first: bool,
}

impl RecordQuery {
    /// Create a new query with default settings (all sensors, oldest first).
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by sensor key.
    pub fn sensor(mut self, key: &SensorKey) -> Self {
        self.sensor = Some(key.clone());
        self
    }

    /// Only records with a timestamp strictly greater than `time`.
    ///
    /// The exclusive bound matches watermark semantics: a record exactly at
    /// the watermark is already synced.
    pub fn after(mut self, time: OffsetDateTime) -> Self {
        self.after = Some(time);
        self
    }

    /// Only records at or before `time`.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results newest first.
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref key) = self.sensor {
            conditions.push("sensor_key = ?");
            params.push(Box::new(key.as_str().to_string()));
        }

        if let Some(after) = self.after {
            conditions.push("date > ?");
            params.push(Box::new(to_millis(after)));
        }

        if let Some(until) = self.until {
            conditions.push("date <= ?");
            params.push(Box::new(to_millis(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, {} FROM records {} ORDER BY date {}",
            RECORD_COLUMNS, where_clause, order
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = self.offset {
            // SQLite requires a LIMIT before OFFSET
            if self.limit.is_none() {
                sql.push_str(" LIMIT -1");
            }
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_query_has_no_filters() {
        let query = RecordQuery::new();
        let (where_clause, params) = query.build_where();
        assert!(where_clause.is_empty());
        assert!(params.is_empty());
        assert!(query.build_sql().ends_with("ORDER BY date ASC"));
    }

    #[test]
    fn test_after_is_exclusive() {
        let query = RecordQuery::new()
            .sensor(&SensorKey::from("k"))
            .after(OffsetDateTime::UNIX_EPOCH);
        let (where_clause, params) = query.build_where();
        assert_eq!(where_clause, "WHERE sensor_key = ? AND date > ?");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_offset_without_limit() {
        let sql = RecordQuery::new().offset(10).build_sql();
        assert!(sql.ends_with("LIMIT -1 OFFSET 10"));
    }

    #[test]
    fn test_newest_first_with_limit() {
        let sql = RecordQuery::new().newest_first().limit(1).build_sql();
        assert!(sql.ends_with("ORDER BY date DESC LIMIT 1"));
    }
}
