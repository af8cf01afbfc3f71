//! # Data Model
//!
//! Decoded shape of one tweet record. Every business field is a [`Field`] so
//! that a missing key, an explicit `null` and a real value stay distinguishable
//! all the way through extraction.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Tri-state wrapper for optional JSON fields.
///
/// Values of the wrong type decode as [`Field::Null`]: the decoder is not a
/// schema validator, so a malformed optional field degrades to "no value"
/// instead of failing the whole record.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    /// The key was not present on the object.
    Absent,
    /// The key was present with `null` (or with an unusable value).
    Null,
    /// The key was present with a usable value.
    Present(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Absent
    }
}

impl<T> Field<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Field::Absent)
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Field::Present(_))
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            Field::Present(value) => Some(value),
            Field::Absent | Field::Null => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Field::Present(value) => Some(value),
            Field::Absent | Field::Null => None,
        }
    }
}

impl<T: Clone> Field<T> {
    pub fn cloned(&self) -> Option<T> {
        self.as_option().cloned()
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Field::Present(value),
            None => Field::Null,
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Field<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            return Ok(Field::Null);
        }
        Ok(serde_json::from_value(value)
            .map(Field::Present)
            .unwrap_or(Field::Null))
    }
}

impl<T: Serialize> Serialize for Field<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Field::Present(value) => value.serialize(serializer),
            Field::Absent | Field::Null => serializer.serialize_none(),
        }
    }
}

/// 64-bit numeric identifier (tweet ids, user ids).
///
/// Accepts a JSON integer, a decimal string, or the extended-JSON wrapper
/// `{"$numberLong": "..."}` found in documents exported from MongoDB.
/// Always re-encodes as a plain integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NumericId(pub i64);

impl NumericId {
    pub const NUMBER_LONG: &'static str = "$numberLong";

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_i64().map(NumericId),
            Value::String(text) => text.trim().parse().ok().map(NumericId),
            Value::Object(map) => map
                .get(Self::NUMBER_LONG)
                .and_then(|inner| match inner {
                    Value::String(text) => text.trim().parse().ok(),
                    Value::Number(number) => number.as_i64(),
                    _ => None,
                })
                .map(NumericId),
            _ => None,
        }
    }
}

impl fmt::Display for NumericId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for NumericId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        NumericId::from_value(&value)
            .ok_or_else(|| D::Error::custom(format!("not a 64-bit id: {value}")))
    }
}

impl Serialize for NumericId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

/// One decoded tweet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tweet {
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub id: Field<NumericId>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub created_at: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub lang: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub text: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub full_text: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub extended_tweet: Field<ExtendedTweet>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub user: Field<User>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub place: Field<Place>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub coordinates: Field<Point>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub geo: Field<Point>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub entities: Field<Entities>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub extended_entities: Field<Entities>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub quoted_status_id: Field<NumericId>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub in_reply_to_status_id: Field<NumericId>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub in_reply_to_user_id: Field<NumericId>,
}

impl Tweet {
    /// Best available body text: `full_text`, then the extended payload, then `text`.
    pub fn body_text(&self) -> Option<&str> {
        self.full_text
            .as_option()
            .or_else(|| {
                self.extended_tweet
                    .as_option()
                    .and_then(|extended| extended.full_text.as_option())
            })
            .or_else(|| self.text.as_option())
            .map(String::as_str)
    }
}

/// Long-form payload attached to tweets over the legacy length limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtendedTweet {
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub full_text: Field<String>,
}

/// Embedded author profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub id: Field<NumericId>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub name: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub screen_name: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub description: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub verified: Field<bool>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub statuses_count: Field<i64>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub followers_count: Field<i64>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub friends_count: Field<i64>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub time_zone: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub lang: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub location: Field<String>,
}

/// Embedded place object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Place {
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub id: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub country: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub country_code: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub full_name: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub place_type: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub bounding_box: Field<BoundingBox>,
}

/// GeoJSON polygon around a place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundingBox {
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub coordinates: Field<Vec<Vec<[f64; 2]>>>,
}

impl BoundingBox {
    /// `(min_lon, min_lat, max_lon, max_lat)` from corners 0 and 2 of the outer ring.
    pub fn extent(&self) -> Option<(f64, f64, f64, f64)> {
        let ring = self.coordinates.as_option()?.first()?;
        let [min_lon, min_lat] = *ring.first()?;
        let [max_lon, max_lat] = *ring.get(2)?;
        Some((min_lon, min_lat, max_lon, max_lat))
    }
}

/// GeoJSON point (`coordinates`) or legacy point (`geo`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Point {
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub coordinates: Field<[f64; 2]>,
}

/// Entities sub-object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entities {
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub urls: Field<Vec<UrlEntity>>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub media: Field<Vec<MediaEntity>>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub hashtags: Field<Vec<HashtagEntity>>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub user_mentions: Field<Vec<MentionEntity>>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub mentions: Field<Vec<MentionEntity>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlEntity {
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub url: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub expanded_url: Field<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaEntity {
    #[serde(rename = "type", skip_serializing_if = "Field::is_absent")]
    pub kind: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub url: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub media_url: Field<String>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub media_url_https: Field<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashtagEntity {
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub text: Field<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MentionEntity {
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub id: Field<NumericId>,
    #[serde(skip_serializing_if = "Field::is_absent")]
    pub screen_name: Field<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_distinguishes_absent_null_and_present() {
        let user: User = serde_json::from_value(json!({"name": null, "lang": "en"})).unwrap();
        assert_eq!(user.id, Field::Absent);
        assert_eq!(user.name, Field::Null);
        assert_eq!(user.lang, Field::Present("en".to_string()));
    }

    #[test]
    fn test_malformed_optional_field_decodes_as_null() {
        let user: User =
            serde_json::from_value(json!({"followers_count": "many", "verified": 3})).unwrap();
        assert_eq!(user.followers_count, Field::Null);
        assert_eq!(user.verified, Field::Null);
    }

    #[test]
    fn test_numeric_id_accepts_all_encodings() {
        for value in [json!(42), json!("42"), json!({"$numberLong": "42"})] {
            assert_eq!(NumericId::from_value(&value), Some(NumericId(42)));
        }
        assert_eq!(NumericId::from_value(&json!(1.5)), None);
        assert_eq!(NumericId::from_value(&json!([1])), None);
    }

    #[test]
    fn test_numeric_id_keeps_full_snowflake_precision() {
        let id: NumericId = serde_json::from_str("1050118621198921728").unwrap();
        assert_eq!(id.0, 1_050_118_621_198_921_728);
        assert_eq!(serde_json::to_string(&id).unwrap(), "1050118621198921728");
    }

    #[test]
    fn test_bounding_box_extent_uses_opposite_corners() {
        let bbox: BoundingBox = serde_json::from_value(json!({
            "coordinates": [[[-74.0, 40.0], [-74.0, 41.0], [-73.0, 41.0], [-73.0, 40.0]]]
        }))
        .unwrap();
        assert_eq!(bbox.extent(), Some((-74.0, 40.0, -73.0, 41.0)));

        let degenerate: BoundingBox =
            serde_json::from_value(json!({"coordinates": [[[-74.0, 40.0]]]})).unwrap();
        assert_eq!(degenerate.extent(), None);
    }

    #[test]
    fn test_body_text_prefers_full_text() {
        let tweet: Tweet = serde_json::from_value(json!({
            "id": 1,
            "text": "short",
            "extended_tweet": {"full_text": "long form"}
        }))
        .unwrap();
        assert_eq!(tweet.body_text(), Some("long form"));
    }
}
