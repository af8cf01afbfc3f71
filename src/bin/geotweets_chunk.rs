use std::path::{Path, PathBuf};

use geotweets_rs::config::{ChunkOverrides, ConfigOverrides, GeotweetsConfig};
use geotweets_rs::{chunk_parallel, expand_inputs, ParallelOptions, RecordErrorKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

const VALUE_FLAGS: [&str; 10] = [
    "-c",
    "--config",
    "-o",
    "--output",
    "-p",
    "--pattern",
    "-j",
    "--jobs",
    "-t",
    "--temp-dir",
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
        r#"geotweets_chunk - Split NDJSON tweet streams into shard files

USAGE:
    geotweets_chunk [OPTIONS] <INPUT>...

INPUT is an NDJSON file (plain or gzip) or a directory of them.

OPTIONS:
    -c, --config <FILE>       Path to config file (TOML)
    -o, --output <DIR>        Output directory [default: .]
    -p, --pattern <PATTERN>   Shard name pattern [default: {{date}}]
    -j, --jobs <N>            Parallel jobs, 0 = one per CPU [default: 1]
    -t, --temp-dir <DIR>      Partition directory for parallel runs
                              [default: geotweets-chunker-temp]
    -k, --keep-temporary      Keep partition files after merging
        --no-compress         Write plain .json shards instead of .json.gz
    -h, --help                Print help

PATTERN TOKENS:
    {{date}} {{year}} {{month}} {{day}} {{hour}}   from created_at, UTC
    {{lang}}, {{user.id}}, {{place.country_code}}   any dotted field path
    {{id%16}}                                  integer field modulo N
    {{hash:user.screen_name%32}}               stable hash modulo N
    {{{{ and }}}}                                  literal braces

ENVIRONMENT:
    GEOTWEETS_CONFIG           Path to config file
    GEOTWEETS_CHUNK__PATTERN   Shard name pattern
    GEOTWEETS_CHUNK__JOBS      Parallel jobs
    RUST_LOG                   Log filter [default: info]
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
    let mut chunk = ChunkOverrides::default();
    if let Some(output) = parse_arg("--output").or_else(|| parse_arg("-o")) {
        chunk.output_dir = Some(output.into());
    }
    if let Some(pattern) = parse_arg("--pattern").or_else(|| parse_arg("-p")) {
        chunk.pattern = Some(pattern);
    }
    if let Some(jobs) = parse_arg("--jobs").or_else(|| parse_arg("-j")) {
        let jobs: usize = jobs.parse()?;
        chunk.jobs = Some(if jobs == 0 {
            geotweets_rs::config::available_jobs()
        } else {
            jobs
        });
    }
    if let Some(temp_dir) = parse_arg("--temp-dir").or_else(|| parse_arg("-t")) {
        chunk.temp_dir = Some(temp_dir.into());
    }
    if has_flag("--keep-temporary") || has_flag("-k") {
        chunk.keep_temporary_files = Some(true);
    }
    if has_flag("--no-compress") {
        chunk.compress = Some(false);
    }
    let overrides = ConfigOverrides {
        chunk: Some(chunk),
        ..Default::default()
    };

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("GEOTWEETS_CONFIG").ok());
    let config = GeotweetsConfig::load(config_path.as_deref().map(Path::new), overrides)?;

    let inputs = expand_inputs(&positional_args())?;
    if inputs.is_empty() {
        print_help();
        anyhow::bail!("no input files given");
    }

    let options = ParallelOptions {
        router: config.chunk.router_options()?,
        jobs: config.chunk.jobs,
        temp_dir: config.chunk.temp_dir.clone(),
        keep_temporary_files: config.chunk.keep_temporary_files,
    };
    info!(
        pattern = %options.router.pattern,
        output = %options.router.output_dir.display(),
        jobs = options.jobs,
        files = inputs.len(),
        "starting chunking"
    );
    let report = chunk_parallel(&inputs, &options)?;

    println!("lines   {}", report.lines);
    println!("routed  {}", report.routed());
    println!("shards  {}", report.shards.len());
    for kind in RecordErrorKind::ALL {
        let skipped = report.skipped_of(kind);
        if skipped > 0 {
            println!("skipped {} {}", kind.as_str(), skipped);
        }
    }
    Ok(())
}
