//! # Upsert Controller
//!
//! Sequences the writes of each record so that every reference resolves at
//! the moment it is written:
//!
//! ```text
//! user (insert once) -> place (insert once) -> tweet (must be new) -> children
//! ```
//!
//! Users and places follow first-write-wins: the first sighting of a key is
//! inserted and later sightings are only references. The seen sets grow with
//! the number of distinct authors and places, never with the number of
//! tweets. Tweet uniqueness is checked against the store itself.

use crate::decode::decode_line;
use crate::error::{RecordError, RecordErrorKind, StoreError};
use crate::extract::{extract, ExtractedRecord};
use crate::input::InputLine;
use crate::store::{TableCounts, TweetStore};
use anyhow::Context;
use hashbrown::HashSet;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// What happened to one successfully ingested record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub user_inserted: bool,
    pub place_inserted: bool,
    /// The record referenced a place that was already stored.
    pub place_reused: bool,
    pub children_inserted: usize,
}

/// Totals for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Non-blank lines consumed.
    pub lines: u64,
    pub tweets_inserted: u64,
    pub users_inserted: u64,
    pub users_reused: u64,
    pub places_inserted: u64,
    pub places_reused: u64,
    pub children_inserted: u64,
    pub skipped: BTreeMap<RecordErrorKind, u64>,
}

impl IngestReport {
    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    pub fn skipped_of(&self, kind: RecordErrorKind) -> u64 {
        self.skipped.get(&kind).copied().unwrap_or(0)
    }

    fn record_outcome(&mut self, outcome: UpsertOutcome) {
        self.tweets_inserted += 1;
        if outcome.user_inserted {
            self.users_inserted += 1;
        } else {
            self.users_reused += 1;
        }
        if outcome.place_inserted {
            self.places_inserted += 1;
        }
        if outcome.place_reused {
            self.places_reused += 1;
        }
        self.children_inserted += outcome.children_inserted as u64;
    }

    fn record_skip(&mut self, kind: RecordErrorKind) {
        *self.skipped.entry(kind).or_default() += 1;
    }
}

/// Failure of a single upsert: either scoped to the record, or a store
/// failure that ends the run.
#[derive(Debug)]
pub enum UpsertError {
    Record(RecordError),
    Store(StoreError),
}

impl From<RecordError> for UpsertError {
    fn from(err: RecordError) -> Self {
        UpsertError::Record(err)
    }
}

impl From<StoreError> for UpsertError {
    fn from(err: StoreError) -> Self {
        UpsertError::Store(err)
    }
}

/// Run-scoped write sequencer over a [`TweetStore`].
pub struct UpsertController<S: TweetStore> {
    store: S,
    seen_users: HashSet<i64>,
    seen_places: HashSet<String>,
    report: IngestReport,
}

impl<S: TweetStore> UpsertController<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            seen_users: HashSet::new(),
            seen_places: HashSet::new(),
            report: IngestReport::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn report(&self) -> &IngestReport {
        &self.report
    }

    pub fn distinct_users(&self) -> usize {
        self.seen_users.len()
    }

    pub fn distinct_places(&self) -> usize {
        self.seen_places.len()
    }

    /// Write the rows of one extracted record.
    pub fn upsert(&mut self, record: &ExtractedRecord) -> Result<UpsertOutcome, UpsertError> {
        let tweet_id = record.tweet.id;
        if self.store.has_tweet(tweet_id)? {
            return Err(RecordError::DuplicateTweet { id: tweet_id }.into());
        }

        let mut outcome = UpsertOutcome::default();

        if !self.seen_users.contains(&record.user.id) {
            outcome.user_inserted = insert_once(self.store.insert_user(&record.user))?;
            self.seen_users.insert(record.user.id);
        }

        if let Some(place) = &record.place {
            if !self.seen_places.contains(&place.id) {
                outcome.place_inserted = insert_once(self.store.insert_place(place))?;
                self.seen_places.insert(place.id.clone());
            }
            outcome.place_reused = !outcome.place_inserted;
        }

        match self.store.insert_tweet(&record.tweet) {
            Ok(()) => {}
            Err(StoreError::Duplicate { .. }) => {
                return Err(RecordError::DuplicateTweet { id: tweet_id }.into());
            }
            Err(err) => return Err(err.into()),
        }

        for url in &record.urls {
            self.store.insert_url(url)?;
        }
        for media in &record.media {
            self.store.insert_media(media)?;
        }
        for hashtag in &record.hashtags {
            self.store.insert_hashtag(hashtag)?;
        }
        for mention in &record.mentions {
            self.store.insert_mention(mention)?;
        }
        outcome.children_inserted = record.child_count();

        self.store.end_record()?;
        Ok(outcome)
    }

    /// Decode, extract and upsert one input line.
    ///
    /// Record-scoped failures are counted and returned in the inner result;
    /// the outer error is a store failure that should end the run.
    pub fn ingest_line(
        &mut self,
        line_no: u64,
        line: &str,
    ) -> anyhow::Result<Result<UpsertOutcome, RecordError>> {
        self.report.lines += 1;
        let result = decode_line(line)
            .and_then(|tweet| extract(&tweet))
            .map_err(UpsertError::Record)
            .and_then(|record| self.upsert(&record));

        match result {
            Ok(outcome) => {
                self.report.record_outcome(outcome);
                Ok(Ok(outcome))
            }
            Err(UpsertError::Record(err)) => {
                warn!(line = line_no, kind = %err.kind(), error = %err, "skipping record");
                self.report.record_skip(err.kind());
                Ok(Err(err))
            }
            Err(UpsertError::Store(err)) => Err(anyhow::Error::new(err)
                .context(format!("store failure while ingesting line {line_no}"))),
        }
    }

    /// Ingest every line of an input, continuing past record-scoped errors.
    ///
    /// I/O failures of the input itself end the run.
    #[instrument(skip_all)]
    pub fn ingest_lines<I>(&mut self, lines: I) -> anyhow::Result<&IngestReport>
    where
        I: IntoIterator<Item = std::io::Result<InputLine>>,
    {
        for line in lines {
            let InputLine { line_no, text } = line.context("failed to read input")?;
            match text {
                Ok(text) => {
                    let _ = self.ingest_line(line_no, &text)?;
                }
                Err(err) => {
                    self.report.lines += 1;
                    warn!(line = line_no, kind = %err.kind(), error = %err, "skipping record");
                    self.report.record_skip(err.kind());
                }
            }
        }
        Ok(&self.report)
    }

    /// Flush the store and hand it back together with the run report.
    pub fn finish(mut self) -> anyhow::Result<(S, IngestReport)> {
        self.store.flush()?;
        let counts: TableCounts = self.store.counts()?;
        info!(
            lines = self.report.lines,
            tweets = self.report.tweets_inserted,
            users = counts.users,
            places = counts.places,
            skipped = self.report.skipped_total(),
            "ingestion finished"
        );
        Ok((self.store, self.report))
    }
}

/// `Ok(false)` when the store already held the key, e.g. a database reused
/// across runs. The existing row wins.
fn insert_once(result: Result<(), StoreError>) -> Result<bool, StoreError> {
    match result {
        Ok(()) => Ok(true),
        Err(StoreError::Duplicate { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}
