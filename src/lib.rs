//! # Geotweets
//!
//! Turns newline-delimited tweet JSON into a normalized relational store and
//! repartitions the same streams into deterministic shard files.
//!
//! Two independent pipelines share the record decoding layer:
//!
//! - ingestion: [`decode`] → [`extract`] → [`upsert::UpsertController`] →
//!   [`store::TweetStore`] (SQLite or in-memory);
//! - chunking: [`router::ChunkRouter`], optionally fanned out over several
//!   jobs by [`merge::chunk_parallel`].

pub mod config;
pub mod decode;
pub mod error;
pub mod extract;
pub mod input;
pub mod merge;
pub mod model;
pub mod router;
pub mod schema;
pub mod store;
pub mod temporal;
pub mod test_support;
pub mod upsert;

// Re-export main types for convenience
pub use config::{ConfigError, ConfigOverrides, GeotweetsConfig};
pub use error::{RecordError, RecordErrorKind, StoreError};
pub use extract::ExtractedRecord;
pub use input::{expand_inputs, open_lines, InputLine};
pub use merge::{chunk_parallel, merge_partitions, split_inputs, ParallelOptions};
pub use model::{Field, NumericId, Tweet};
pub use router::{ChunkRouter, RouteReport, RouterOptions, ShardPattern};
pub use store::{MemoryStore, SqliteOptions, SqliteStore, TableCounts, TweetStore};
pub use upsert::{IngestReport, UpsertController};

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{info, info_span};

/// Ingest every input file into the SQLite database at `database`.
pub fn import_files(
    database: &Path,
    options: SqliteOptions,
    inputs: &[PathBuf],
) -> Result<(TableCounts, IngestReport)> {
    let store = SqliteStore::open(database, options)?;
    let mut controller = UpsertController::new(store);
    for path in inputs {
        let _span = info_span!("import_file", path = %path.display()).entered();
        info!("importing");
        controller.ingest_lines(open_lines(path)?)?;
    }
    let (store, report) = controller.finish()?;
    Ok((store.counts()?, report))
}
