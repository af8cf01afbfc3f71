//! # Store Module
//!
//! The relational target of the ingestion path. [`TweetStore`] is the seam the
//! upsert controller writes through; [`MemoryStore`] keeps rows in maps for
//! tests and benches, [`SqliteStore`] persists them with declared primary and
//! foreign keys.

use crate::error::StoreError;
use crate::extract::{HashtagRow, MediaRow, MentionRow, PlaceRow, TweetRow, UrlRow, UserRow};
use crate::schema::{
    PragmaProfile, SCHEMA_SQL, TABLES, TABLE_HASHTAGS, TABLE_MEDIA, TABLE_MENTIONS, TABLE_PLACES,
    TABLE_TWEETS, TABLE_URLS, TABLE_USERS,
};
use anyhow::{anyhow, Context};
use hashbrown::HashMap;
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use tracing::{debug, warn};

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub users: u64,
    pub places: u64,
    pub tweets: u64,
    pub urls: u64,
    pub media: u64,
    pub hashtags: u64,
    pub mentions: u64,
}

/// Write interface of the relational store.
///
/// Implementations reject a second insert of the same user, place or tweet
/// key with [`StoreError::Duplicate`], and reject rows whose foreign keys do
/// not resolve.
pub trait TweetStore {
    fn has_tweet(&self, id: i64) -> Result<bool, StoreError>;
    fn insert_user(&mut self, row: &UserRow) -> Result<(), StoreError>;
    fn insert_place(&mut self, row: &PlaceRow) -> Result<(), StoreError>;
    fn insert_tweet(&mut self, row: &TweetRow) -> Result<(), StoreError>;
    fn insert_url(&mut self, row: &UrlRow) -> Result<(), StoreError>;
    fn insert_media(&mut self, row: &MediaRow) -> Result<(), StoreError>;
    fn insert_hashtag(&mut self, row: &HashtagRow) -> Result<(), StoreError>;
    fn insert_mention(&mut self, row: &MentionRow) -> Result<(), StoreError>;

    /// Called once after all rows of a record were written.
    fn end_record(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Make every written row durable.
    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    fn counts(&self) -> Result<TableCounts, StoreError>;
}

/// In-memory store with the same key and reference checks as SQLite.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    users: HashMap<i64, UserRow>,
    places: HashMap<String, PlaceRow>,
    tweets: HashMap<i64, TweetRow>,
    urls: Vec<UrlRow>,
    media: Vec<MediaRow>,
    hashtags: Vec<HashtagRow>,
    mentions: Vec<MentionRow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, id: i64) -> Option<&UserRow> {
        self.users.get(&id)
    }

    pub fn place(&self, id: &str) -> Option<&PlaceRow> {
        self.places.get(id)
    }

    pub fn tweet(&self, id: i64) -> Option<&TweetRow> {
        self.tweets.get(&id)
    }

    pub fn tweets(&self) -> impl Iterator<Item = &TweetRow> {
        self.tweets.values()
    }

    pub fn urls(&self) -> &[UrlRow] {
        &self.urls
    }

    pub fn media(&self) -> &[MediaRow] {
        &self.media
    }

    pub fn hashtags(&self) -> &[HashtagRow] {
        &self.hashtags
    }

    pub fn mentions(&self) -> &[MentionRow] {
        &self.mentions
    }

    fn require_tweet(&self, tweet_id: i64, table: &str) -> Result<(), StoreError> {
        if self.tweets.contains_key(&tweet_id) {
            Ok(())
        } else {
            Err(StoreError::Backend(anyhow!(
                "foreign key violation: {table}.tweet_id {tweet_id} has no tweet row"
            )))
        }
    }
}

impl TweetStore for MemoryStore {
    fn has_tweet(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.tweets.contains_key(&id))
    }

    fn insert_user(&mut self, row: &UserRow) -> Result<(), StoreError> {
        if self.users.contains_key(&row.id) {
            return Err(StoreError::Duplicate {
                table: TABLE_USERS,
                key: row.id.to_string(),
            });
        }
        self.users.insert(row.id, row.clone());
        Ok(())
    }

    fn insert_place(&mut self, row: &PlaceRow) -> Result<(), StoreError> {
        if self.places.contains_key(&row.id) {
            return Err(StoreError::Duplicate {
                table: TABLE_PLACES,
                key: row.id.clone(),
            });
        }
        self.places.insert(row.id.clone(), row.clone());
        Ok(())
    }

    fn insert_tweet(&mut self, row: &TweetRow) -> Result<(), StoreError> {
        if self.tweets.contains_key(&row.id) {
            return Err(StoreError::Duplicate {
                table: TABLE_TWEETS,
                key: row.id.to_string(),
            });
        }
        if !self.users.contains_key(&row.user_id) {
            return Err(StoreError::Backend(anyhow!(
                "foreign key violation: tweet {} references missing user {}",
                row.id,
                row.user_id
            )));
        }
        if let Some(place_id) = &row.place_id {
            if !self.places.contains_key(place_id) {
                return Err(StoreError::Backend(anyhow!(
                    "foreign key violation: tweet {} references missing place {place_id}",
                    row.id
                )));
            }
        }
        self.tweets.insert(row.id, row.clone());
        Ok(())
    }

    fn insert_url(&mut self, row: &UrlRow) -> Result<(), StoreError> {
        self.require_tweet(row.tweet_id, TABLE_URLS)?;
        self.urls.push(row.clone());
        Ok(())
    }

    fn insert_media(&mut self, row: &MediaRow) -> Result<(), StoreError> {
        self.require_tweet(row.tweet_id, TABLE_MEDIA)?;
        self.media.push(row.clone());
        Ok(())
    }

    fn insert_hashtag(&mut self, row: &HashtagRow) -> Result<(), StoreError> {
        self.require_tweet(row.tweet_id, TABLE_HASHTAGS)?;
        self.hashtags.push(row.clone());
        Ok(())
    }

    fn insert_mention(&mut self, row: &MentionRow) -> Result<(), StoreError> {
        self.require_tweet(row.tweet_id, TABLE_MENTIONS)?;
        self.mentions.push(row.clone());
        Ok(())
    }

    fn counts(&self) -> Result<TableCounts, StoreError> {
        Ok(TableCounts {
            users: self.users.len() as u64,
            places: self.places.len() as u64,
            tweets: self.tweets.len() as u64,
            urls: self.urls.len() as u64,
            media: self.media.len() as u64,
            hashtags: self.hashtags.len() as u64,
            mentions: self.mentions.len() as u64,
        })
    }
}

/// Options for opening a [`SqliteStore`].
#[derive(Debug, Clone, Copy)]
pub struct SqliteOptions {
    pub pragmas: PragmaProfile,
    /// Records written per transaction.
    pub commit_interval: usize,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            pragmas: PragmaProfile::default(),
            commit_interval: crate::config::DEFAULT_COMMIT_INTERVAL,
        }
    }
}

/// SQLite-backed store.
///
/// Rows are grouped into transactions of `commit_interval` records. Dropping
/// the store commits the open transaction, so records processed before an
/// early exit are kept.
pub struct SqliteStore {
    conn: Connection,
    options: SqliteOptions,
    in_transaction: bool,
    pending_records: usize,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, options: SqliteOptions) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        Self::init(conn, options)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?, SqliteOptions::default())
    }

    fn init(conn: Connection, options: SqliteOptions) -> anyhow::Result<Self> {
        conn.execute_batch(options.pragmas.sql())?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to create schema")?;
        Ok(Self {
            conn,
            options,
            in_transaction: false,
            pending_records: 0,
        })
    }

    /// Read access for queries over the imported data.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn begin_if_needed(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            self.conn.execute_batch("COMMIT")?;
            self.in_transaction = false;
            debug!(records = self.pending_records, "committed transaction");
            self.pending_records = 0;
        }
        Ok(())
    }

    fn execute(
        &mut self,
        table: &'static str,
        key: impl FnOnce() -> String,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<(), StoreError> {
        self.begin_if_needed()?;
        let result = self.conn.prepare_cached(sql)?.execute(params);
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_primary_key_violation(&err) => {
                Err(StoreError::Duplicate { table, key: key() })
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.code == ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                        | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                )
        }
        _ => false,
    }
}

impl TweetStore for SqliteStore {
    fn has_tweet(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .prepare_cached("SELECT 1 FROM tweets WHERE id = ?1")?
            .exists(params![id])?)
    }

    fn insert_user(&mut self, row: &UserRow) -> Result<(), StoreError> {
        self.execute(
            TABLE_USERS,
            || row.id.to_string(),
            "INSERT INTO users (id, name, screen_name, description, verified, statuses_count,
                                followers_count, friends_count, time_zone, lang, location)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                row.id,
                row.name,
                row.screen_name,
                row.description,
                row.verified.map(i64::from),
                row.statuses_count,
                row.followers_count,
                row.friends_count,
                row.time_zone,
                row.lang,
                row.location,
            ],
        )
    }

    fn insert_place(&mut self, row: &PlaceRow) -> Result<(), StoreError> {
        self.execute(
            TABLE_PLACES,
            || row.id.clone(),
            "INSERT INTO places (id, country, country_code, full_name, place_type,
                                 min_lon, min_lat, max_lon, max_lat)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.id,
                row.country,
                row.country_code,
                row.full_name,
                row.place_type,
                row.min_lon,
                row.min_lat,
                row.max_lon,
                row.max_lat,
            ],
        )
    }

    fn insert_tweet(&mut self, row: &TweetRow) -> Result<(), StoreError> {
        self.execute(
            TABLE_TWEETS,
            || row.id.to_string(),
            "INSERT INTO tweets (id, user_id, place_id, created_at, timestamp, lang, text,
                                 quoted_status_id, in_reply_to_status_id, in_reply_to_user_id,
                                 lat, lon)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                row.id,
                row.user_id,
                row.place_id,
                row.created_at,
                row.timestamp,
                row.lang,
                row.text,
                row.quoted_status_id,
                row.in_reply_to_status_id,
                row.in_reply_to_user_id,
                row.lat,
                row.lon,
            ],
        )
    }

    fn insert_url(&mut self, row: &UrlRow) -> Result<(), StoreError> {
        self.execute(
            TABLE_URLS,
            String::new,
            "INSERT INTO urls (tweet_id, url, shortened_url) VALUES (?1, ?2, ?3)",
            params![row.tweet_id, row.url, row.shortened_url],
        )
    }

    fn insert_media(&mut self, row: &MediaRow) -> Result<(), StoreError> {
        self.execute(
            TABLE_MEDIA,
            String::new,
            "INSERT INTO media (tweet_id, type, url, shortened_url) VALUES (?1, ?2, ?3, ?4)",
            params![row.tweet_id, row.kind, row.url, row.shortened_url],
        )
    }

    fn insert_hashtag(&mut self, row: &HashtagRow) -> Result<(), StoreError> {
        self.execute(
            TABLE_HASHTAGS,
            String::new,
            "INSERT INTO hashtags (tweet_id, text) VALUES (?1, ?2)",
            params![row.tweet_id, row.text],
        )
    }

    fn insert_mention(&mut self, row: &MentionRow) -> Result<(), StoreError> {
        self.execute(
            TABLE_MENTIONS,
            String::new,
            "INSERT INTO mentions (tweet_id, user_id, screen_name) VALUES (?1, ?2, ?3)",
            params![row.tweet_id, row.user_id, row.screen_name],
        )
    }

    fn end_record(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            self.pending_records += 1;
            if self.pending_records >= self.options.commit_interval.max(1) {
                self.commit()?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.commit()
    }

    fn counts(&self) -> Result<TableCounts, StoreError> {
        let mut counts = [0u64; TABLES.len()];
        for (slot, table) in counts.iter_mut().zip(TABLES) {
            let count: i64 =
                self.conn
                    .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            *slot = count as u64;
        }
        let [users, places, tweets, urls, media, hashtags, mentions] = counts;
        Ok(TableCounts {
            users,
            places,
            tweets,
            urls,
            media,
            hashtags,
            mentions,
        })
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if let Err(err) = self.commit() {
            warn!(error = %err, "failed to commit pending rows on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, name: &str) -> UserRow {
        UserRow {
            id,
            name: Some(name.to_string()),
            screen_name: None,
            description: None,
            verified: Some(false),
            statuses_count: None,
            followers_count: None,
            friends_count: None,
            time_zone: None,
            lang: None,
            location: None,
        }
    }

    fn tweet(id: i64, user_id: i64, place_id: Option<&str>) -> TweetRow {
        TweetRow {
            id,
            user_id,
            place_id: place_id.map(str::to_string),
            created_at: None,
            timestamp: None,
            lang: Some("en".to_string()),
            text: None,
            quoted_status_id: None,
            in_reply_to_status_id: None,
            in_reply_to_user_id: None,
            lat: None,
            lon: None,
        }
    }

    fn exercise_store(store: &mut dyn TweetStore) {
        store.insert_user(&user(1, "ann")).unwrap();
        assert!(matches!(
            store.insert_user(&user(1, "other")),
            Err(StoreError::Duplicate { table: "users", .. })
        ));

        store.insert_tweet(&tweet(10, 1, None)).unwrap();
        assert!(store.has_tweet(10).unwrap());
        assert!(!store.has_tweet(11).unwrap());
        assert!(matches!(
            store.insert_tweet(&tweet(10, 1, None)),
            Err(StoreError::Duplicate { table: "tweets", .. })
        ));

        // Missing parents are rejected.
        assert!(matches!(
            store.insert_tweet(&tweet(11, 2, None)),
            Err(StoreError::Backend(_))
        ));
        assert!(matches!(
            store.insert_tweet(&tweet(12, 1, Some("nowhere"))),
            Err(StoreError::Backend(_))
        ));
        assert!(matches!(
            store.insert_hashtag(&HashtagRow {
                tweet_id: 99,
                text: "x".to_string()
            }),
            Err(StoreError::Backend(_))
        ));

        store
            .insert_hashtag(&HashtagRow {
                tweet_id: 10,
                text: "x".to_string(),
            })
            .unwrap();
        store.end_record().unwrap();
        store.flush().unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.users, 1);
        assert_eq!(counts.tweets, 1);
        assert_eq!(counts.hashtags, 1);
    }

    #[test]
    fn test_memory_store_enforces_keys() {
        let mut store = MemoryStore::new();
        exercise_store(&mut store);
        assert_eq!(store.user(1).unwrap().name.as_deref(), Some("ann"));
    }

    #[test]
    fn test_sqlite_store_enforces_keys() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        exercise_store(&mut store);
        let name: String = store
            .connection()
            .query_row("SELECT name FROM users WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(name, "ann");
    }

    #[test]
    fn test_sqlite_store_stores_flags_as_integers() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut verified = user(5, "v");
        verified.verified = Some(true);
        store.insert_user(&verified).unwrap();
        store.flush().unwrap();
        let flag: i64 = store
            .connection()
            .query_row("SELECT verified FROM users WHERE id = 5", [], |row| row.get(0))
            .unwrap();
        assert_eq!(flag, 1);
    }

    #[test]
    fn test_sqlite_store_persists_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tweets.db");
        {
            let mut store = SqliteStore::open(
                &path,
                SqliteOptions {
                    pragmas: PragmaProfile::Normal,
                    commit_interval: 1_000,
                },
            )
            .unwrap();
            store.insert_user(&user(1, "ann")).unwrap();
            store.insert_tweet(&tweet(10, 1, None)).unwrap();
            store.end_record().unwrap();
        }
        let reopened = SqliteStore::open(&path, SqliteOptions::default()).unwrap();
        assert_eq!(reopened.counts().unwrap().tweets, 1);
    }
}
