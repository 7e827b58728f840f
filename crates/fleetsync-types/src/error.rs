//! Error types for identifier and value parsing in fleetsync-types.

use thiserror::Error;

/// Errors that can occur when parsing sensor identifiers and enum values.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// A MAC identifier did not contain exactly six hex octets.
    #[error("Invalid MAC identifier '{0}': expected 6 hex octets")]
    InvalidMacId(String),

    /// A string did not name a known enum variant.
    #[error("Unknown {kind} '{value}'")]
    UnknownVariant {
        /// The kind of value being parsed (e.g. "sync status").
        kind: &'static str,
        /// The offending input.
        value: String,
    },
}

/// Result type alias using fleetsync-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
