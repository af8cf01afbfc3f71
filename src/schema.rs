//! # Relational Schema
//!
//! Fixed table layout of the normalized store. Numeric ids are 64-bit
//! integers, coordinates are REAL and flags are 0/1 integers.

use serde::de::value::{Error as ValueError, StrDeserializer};
use serde::de::IntoDeserializer;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const TABLE_USERS: &str = "users";
pub const TABLE_PLACES: &str = "places";
pub const TABLE_TWEETS: &str = "tweets";
pub const TABLE_URLS: &str = "urls";
pub const TABLE_MEDIA: &str = "media";
pub const TABLE_HASHTAGS: &str = "hashtags";
pub const TABLE_MENTIONS: &str = "mentions";

/// All tables, parents before children.
pub const TABLES: [&str; 7] = [
    TABLE_USERS,
    TABLE_PLACES,
    TABLE_TWEETS,
    TABLE_URLS,
    TABLE_MEDIA,
    TABLE_HASHTAGS,
    TABLE_MENTIONS,
];

pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id              INTEGER PRIMARY KEY,
    name            TEXT,
    screen_name     TEXT,
    description     TEXT,
    verified        INTEGER,
    statuses_count  INTEGER,
    followers_count INTEGER,
    friends_count   INTEGER,
    time_zone       TEXT,
    lang            TEXT,
    location        TEXT
);

CREATE TABLE IF NOT EXISTS places (
    id           TEXT PRIMARY KEY,
    country      TEXT,
    country_code TEXT,
    full_name    TEXT,
    place_type   TEXT,
    min_lon      REAL,
    min_lat      REAL,
    max_lon      REAL,
    max_lat      REAL
);

CREATE TABLE IF NOT EXISTS tweets (
    id                    INTEGER PRIMARY KEY,
    user_id               INTEGER NOT NULL REFERENCES users(id),
    place_id              TEXT REFERENCES places(id),
    created_at            TEXT,
    timestamp             REAL,
    lang                  TEXT,
    text                  TEXT,
    quoted_status_id      INTEGER,
    in_reply_to_status_id INTEGER,
    in_reply_to_user_id   INTEGER,
    lat                   REAL,
    lon                   REAL
);

CREATE TABLE IF NOT EXISTS urls (
    tweet_id      INTEGER NOT NULL REFERENCES tweets(id),
    url           TEXT,
    shortened_url TEXT
);

CREATE TABLE IF NOT EXISTS media (
    tweet_id      INTEGER NOT NULL REFERENCES tweets(id),
    type          TEXT,
    url           TEXT,
    shortened_url TEXT
);

CREATE TABLE IF NOT EXISTS hashtags (
    tweet_id INTEGER NOT NULL REFERENCES tweets(id),
    text     TEXT NOT NULL
);

-- user_id is not a foreign key: mentioned accounts need not be authors.
CREATE TABLE IF NOT EXISTS mentions (
    tweet_id    INTEGER NOT NULL REFERENCES tweets(id),
    user_id     INTEGER NOT NULL,
    screen_name TEXT
);
";

/// SQLite durability settings applied when a store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PragmaProfile {
    /// No fsync and no rollback journal. A crash can corrupt the file, which
    /// is acceptable for a rebuildable bulk import.
    #[default]
    HighThroughput,
    /// SQLite defaults for a database that is also read while importing.
    Normal,
}

impl PragmaProfile {
    pub fn sql(self) -> &'static str {
        match self {
            PragmaProfile::HighThroughput => {
                "PRAGMA synchronous = OFF;\nPRAGMA journal_mode = OFF;\n"
            }
            PragmaProfile::Normal => "PRAGMA synchronous = NORMAL;\nPRAGMA journal_mode = DELETE;\n",
        }
    }
}

/// Accepts the same names as the config file.
impl FromStr for PragmaProfile {
    type Err = ValueError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let deserializer: StrDeserializer<'_, ValueError> = value.into_deserializer();
        Self::deserialize(deserializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_declares_every_table() {
        for table in TABLES {
            assert!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing {table}"
            );
        }
    }

    #[test]
    fn test_pragma_profile_serde() {
        let json = serde_json::to_string(&PragmaProfile::HighThroughput).unwrap();
        assert_eq!(json, "\"high-throughput\"");
        let profile: PragmaProfile = serde_json::from_str("\"normal\"").unwrap();
        assert_eq!(profile, PragmaProfile::Normal);
    }

    #[test]
    fn test_pragma_profile_from_str_matches_serde_names() {
        assert_eq!("normal".parse::<PragmaProfile>().unwrap(), PragmaProfile::Normal);
        assert_eq!(
            "high-throughput".parse::<PragmaProfile>().unwrap(),
            PragmaProfile::HighThroughput
        );
        let err = "HighThroughput".parse::<PragmaProfile>().unwrap_err();
        assert!(err.to_string().contains("high-throughput"));
    }
}
