//! Parse errors for procfs statistics files.
//!
//! [`StatParseError`] converts into [`std::io::Error`] with kind
//! [`InvalidData`](std::io::ErrorKind::InvalidData), so parsers can return plain
//! `io::Result` and callers can still tell malformed content from failed reads.

use std::num::ParseIntError;

#[derive(Debug, thiserror::Error)]
pub enum StatParseError {
    #[error("duplicate field '{field}' at line {line}")]
    DuplicateField { field: String, line: usize },

    #[error("invalid value for '{key}' at line {line}: '{value}': {source}")]
    InvalidKeyValue {
        key: String,
        value: String,
        line: usize,
        #[source]
        source: ParseIntError,
    },

    #[error("invalid value at line {line}: '{value}': {source}")]
    InvalidValue {
        value: String,
        line: usize,
        #[source]
        source: ParseIntError,
    },

    #[error("expected '{expected}' at line {line}, found '{found}'")]
    UnexpectedKey {
        expected: &'static str,
        found: String,
        line: usize,
    },

    #[error("expected at least {expected} values at line {line}, found {found}")]
    MissingValues {
        expected: usize,
        found: usize,
        line: usize,
    },
}

impl From<StatParseError> for std::io::Error {
    fn from(err: StatParseError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, err)
    }
}

/// Extracts a `StatParseError` from an `std::io::Error` assuming it was wrapped.
///
/// Panics if the inner error is not a `StatParseError`. Intended for use in test assertions only.
#[cfg(test)]
pub(crate) fn extract_stat_parse_error(err: &std::io::Error) -> &StatParseError {
    err.get_ref()
        .and_then(|e| e.downcast_ref::<StatParseError>())
        .unwrap()
}
