use std::path::{Path, PathBuf};

use geotweets_rs::config::{ConfigOverrides, GeotweetsConfig, IngestOverrides};
use geotweets_rs::schema::PragmaProfile;
use geotweets_rs::{expand_inputs, import_files, RecordErrorKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

const VALUE_FLAGS: [&str; 6] = [
    "-c",
    "--config",
    "-d",
    "--database",
    "--pragmas",
    "--commit-interval",
];

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn positional_args() -> Vec<PathBuf> {
    let mut inputs = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if VALUE_FLAGS.contains(&arg.as_str()) {
            args.next();
        } else if !arg.starts_with('-') {
            inputs.push(PathBuf::from(arg));
        }
    }
    inputs
}

fn print_help() {
    eprintln!(
        r#"geotweets_import - Normalize NDJSON tweets into a SQLite database

USAGE:
    geotweets_import [OPTIONS] -d <DB> <INPUT>...

INPUT is an NDJSON file (plain or gzip) or a directory of them.

OPTIONS:
    -c, --config <FILE>          Path to config file (TOML)
    -d, --database <DB>          SQLite database file, created when missing
        --pragmas <PROFILE>      high-throughput | normal [default: high-throughput]
        --commit-interval <N>    Records per transaction [default: 10000]
    -h, --help                   Print help

ENVIRONMENT:
    GEOTWEETS_CONFIG                   Path to config file
    GEOTWEETS_INGEST__DATABASE         SQLite database file
    GEOTWEETS_INGEST__COMMIT_INTERVAL  Records per transaction
    RUST_LOG                           Log filter [default: info]

CONFIG FILE (geotweets.toml):
    [ingest]
    database = "tweets.db"
    pragmas = "high-throughput"
    commit_interval = 10000
"#
    );
}

fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Build CLI overrides
    let mut ingest = IngestOverrides::default();
    if let Some(database) = parse_arg("--database").or_else(|| parse_arg("-d")) {
        ingest.database = Some(database.into());
    }
    if let Some(pragmas) = parse_arg("--pragmas") {
        ingest.pragmas = Some(pragmas.parse::<PragmaProfile>()?);
    }
    if let Some(interval) = parse_arg("--commit-interval") {
        ingest.commit_interval = Some(interval.parse()?);
    }
    let overrides = ConfigOverrides {
        ingest: Some(ingest),
        ..Default::default()
    };

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("GEOTWEETS_CONFIG").ok());
    let config = GeotweetsConfig::load(config_path.as_deref().map(Path::new), overrides)?;

    let Some(database) = config.ingest.database.clone() else {
        print_help();
        anyhow::bail!("no database given (use --database or [ingest] database)");
    };
    let inputs = expand_inputs(&positional_args())?;
    if inputs.is_empty() {
        print_help();
        anyhow::bail!("no input files given");
    }

    info!(
        database = %database.display(),
        files = inputs.len(),
        pragmas = ?config.ingest.pragmas,
        commit_interval = config.ingest.commit_interval,
        "starting import"
    );
    let (counts, report) = import_files(&database, config.ingest.sqlite_options(), &inputs)?;

    println!("lines            {}", report.lines);
    println!("tweets inserted  {}", report.tweets_inserted);
    println!("users inserted   {}", report.users_inserted);
    println!("places inserted  {}", report.places_inserted);
    println!("children         {}", report.children_inserted);
    for kind in RecordErrorKind::ALL {
        println!("skipped {:<16} {}", kind.as_str(), report.skipped_of(kind));
    }
    println!(
        "tables           users={} places={} tweets={} urls={} media={} hashtags={} mentions={}",
        counts.users,
        counts.places,
        counts.tweets,
        counts.urls,
        counts.media,
        counts.hashtags,
        counts.mentions
    );
    Ok(())
}
