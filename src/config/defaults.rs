//! Default constants for geotweets configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Ingestion Defaults
// =============================================================================

/// Records written per SQLite transaction.
/// Larger values amortize commit cost; smaller values lose less on a crash.
pub const DEFAULT_COMMIT_INTERVAL: usize = 10_000;

// =============================================================================
// Chunking Defaults
// =============================================================================

/// Default shard pattern: one file per UTC day.
pub const DEFAULT_PATTERN: &str = "{date}";

/// Default directory for shard files.
pub const DEFAULT_OUTPUT_DIR: &str = ".";

/// Default scratch directory for per-job partitions.
pub const DEFAULT_TEMP_DIR: &str = "geotweets-chunker-temp";

/// Default number of chunking jobs.
pub const DEFAULT_JOBS: usize = 1;

/// Shard files are gzip-compressed unless configured otherwise.
pub const DEFAULT_COMPRESS: bool = true;

/// Extension of compressed shard files.
pub const COMPRESSED_EXTENSION: &str = "json.gz";

/// Extension of plain shard files.
pub const PLAIN_EXTENSION: &str = "json";

/// Number of jobs worth running on this machine.
pub fn available_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(DEFAULT_JOBS)
}
