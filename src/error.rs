//! # Error Module
//!
//! Record-scoped error taxonomy shared by the ingestion and repartitioning
//! paths, plus the store-level error surfaced by [`crate::store::TweetStore`].
//!
//! None of the record errors abort a run: the drivers log them, count them and
//! move on to the next line.

use std::fmt;

/// Classification of a [`RecordError`], used for per-kind skip counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordErrorKind {
    Decode,
    Shape,
    DuplicateTweet,
    Routing,
}

impl RecordErrorKind {
    pub const ALL: [RecordErrorKind; 4] = [
        RecordErrorKind::Decode,
        RecordErrorKind::Shape,
        RecordErrorKind::DuplicateTweet,
        RecordErrorKind::Routing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordErrorKind::Decode => "decode",
            RecordErrorKind::Shape => "shape",
            RecordErrorKind::DuplicateTweet => "duplicate_tweet",
            RecordErrorKind::Routing => "routing",
        }
    }
}

impl fmt::Display for RecordErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error scoped to a single input record.
#[derive(Debug)]
pub enum RecordError {
    /// The line is not syntactically valid JSON (or not valid UTF-8).
    Decode { message: String },
    /// The line decoded but lacks a required field.
    Shape { field: &'static str },
    /// The tweet id was already stored during this run.
    DuplicateTweet { id: i64 },
    /// A shard pattern token could not be resolved on this record.
    Routing { token: String, reason: String },
}

impl RecordError {
    pub fn decode(err: impl fmt::Display) -> Self {
        RecordError::Decode {
            message: err.to_string(),
        }
    }

    pub fn shape(field: &'static str) -> Self {
        RecordError::Shape { field }
    }

    pub fn routing(token: impl Into<String>, reason: impl Into<String>) -> Self {
        RecordError::Routing {
            token: token.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> RecordErrorKind {
        match self {
            RecordError::Decode { .. } => RecordErrorKind::Decode,
            RecordError::Shape { .. } => RecordErrorKind::Shape,
            RecordError::DuplicateTweet { .. } => RecordErrorKind::DuplicateTweet,
            RecordError::Routing { .. } => RecordErrorKind::Routing,
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::Decode { message } => write!(f, "decode error: {message}"),
            RecordError::Shape { field } => {
                write!(f, "shape error: missing required field `{field}`")
            }
            RecordError::DuplicateTweet { id } => {
                write!(f, "duplicate tweet: id {id} was already stored in this run")
            }
            RecordError::Routing { token, reason } => {
                write!(f, "routing error: token `{{{token}}}` {reason}")
            }
        }
    }
}

impl std::error::Error for RecordError {}

/// Errors raised by a [`crate::store::TweetStore`] implementation.
#[derive(Debug)]
pub enum StoreError {
    /// A primary key was inserted twice.
    Duplicate { table: &'static str, key: String },
    /// Any failure of the underlying storage engine.
    Backend(anyhow::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Duplicate { table, key } => {
                write!(f, "duplicate primary key {key} in table {table}")
            }
            StoreError::Backend(err) => write!(f, "store backend error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Duplicate { .. } => None,
            StoreError::Backend(err) => Some(&**err),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.into())
    }
}
