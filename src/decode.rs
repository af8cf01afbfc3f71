//! # Record Decoder
//!
//! Turns one line of newline-delimited JSON into a [`Tweet`]. Decoding is pure:
//! it never touches a store or any run state.

use crate::error::RecordError;
use crate::model::{NumericId, Tweet};
use serde_json::Value;

/// Parse one input line into a JSON value.
///
/// Syntax errors are [`RecordError::Decode`]; a value that is not an object is
/// a [`RecordError::Shape`] since no field of it can be read.
pub fn parse_line(line: &str) -> Result<Value, RecordError> {
    let value: Value = serde_json::from_str(line.trim_end()).map_err(RecordError::decode)?;
    if !value.is_object() {
        return Err(RecordError::shape("<object>"));
    }
    Ok(value)
}

/// Decode one input line into a tweet with a usable `id`.
pub fn decode_line(line: &str) -> Result<Tweet, RecordError> {
    decode_value(parse_line(line)?)
}

/// Decode an already-parsed JSON object.
pub fn decode_value(value: Value) -> Result<Tweet, RecordError> {
    let tweet: Tweet = serde_json::from_value(value).map_err(RecordError::decode)?;
    tweet_id(&tweet)?;
    Ok(tweet)
}

/// The required top-level id of a decoded tweet.
pub fn tweet_id(tweet: &Tweet) -> Result<NumericId, RecordError> {
    tweet
        .id
        .as_option()
        .copied()
        .ok_or_else(|| RecordError::shape("id"))
}
