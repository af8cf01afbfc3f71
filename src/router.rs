//! # Chunk Router
//!
//! Repartitions an NDJSON stream into shard files named by substituting record
//! fields into a pattern such as `{date}`, `{lang}/{id%16}` or
//! `{hash:user.id%32}`.
//!
//! Shard assignment is a pure function of the record: no arrival order, no
//! state shared between shards. Lines are written back byte-for-byte, in
//! input order within each shard. `hash:` tokens use a SHA-256 prefix, so
//! the same record lands in the same shard on any platform.

use crate::config::{COMPRESSED_EXTENSION, PLAIN_EXTENSION};
use crate::decode::parse_line;
use crate::error::{RecordError, RecordErrorKind};
use crate::input::{open_lines, InputLine};
use crate::model::NumericId;
use crate::temporal::CalendarParts;
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use hashbrown::HashMap;
use sha2::{Digest, Sha256};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, info_span, instrument, warn};

/// A shard pattern that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid shard pattern `{}`: {}", self.pattern, self.message)
    }
}

impl std::error::Error for PatternError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Date,
    Year,
    Month,
    Day,
    Hour,
    Path {
        path: Vec<String>,
        modulo: Option<u64>,
        hash: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token { raw: String, token: Token },
}

/// Parsed shard naming pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl ShardPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let error = |message: String| PatternError {
            pattern: pattern.to_string(),
            message,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut raw = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => {
                                return Err(error("unterminated `{`".to_string()));
                            }
                            Some(c) => raw.push(c),
                        }
                    }
                    let token = parse_token(raw.trim()).map_err(error)?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Token {
                        raw: raw.trim().to_string(),
                        token,
                    });
                }
                '}' => return Err(error("unmatched `}`".to_string())),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        if !segments
            .iter()
            .any(|segment| matches!(segment, Segment::Token { .. }))
        {
            return Err(error("pattern has no `{token}`".to_string()));
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Shard name for one decoded record.
    pub fn shard_for(&self, record: &Value) -> Result<String, RecordError> {
        let mut calendar: Option<CalendarParts> = None;
        let mut shard = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => shard.push_str(text),
                Segment::Token { raw, token } => {
                    let value = resolve(raw, token, record, &mut calendar)?;
                    shard.push_str(&sanitize(&value));
                }
            }
        }
        Ok(shard)
    }
}

impl FromStr for ShardPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ShardPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_token(raw: &str) -> Result<Token, String> {
    match raw {
        "date" => return Ok(Token::Date),
        "year" => return Ok(Token::Year),
        "month" => return Ok(Token::Month),
        "day" => return Ok(Token::Day),
        "hour" => return Ok(Token::Hour),
        _ => {}
    }

    let (hash, rest) = match raw.strip_prefix("hash:") {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let (path, modulo) = match rest.split_once('%') {
        Some((path, modulo)) => {
            let modulo: u64 = modulo
                .trim()
                .parse()
                .map_err(|_| format!("`{raw}`: modulus must be a positive integer"))?;
            if modulo == 0 || modulo > i64::MAX as u64 {
                return Err(format!("`{raw}`: modulus must be a positive integer"));
            }
            (path.trim(), Some(modulo))
        }
        None => (rest.trim(), None),
    };
    if hash && modulo.is_none() {
        return Err(format!("`{raw}`: hash tokens need a modulus, e.g. `{{hash:user.id%16}}`"));
    }
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(format!("`{raw}`: empty field path"));
    }

    Ok(Token::Path {
        path: path.split('.').map(str::to_string).collect(),
        modulo,
        hash,
    })
}

fn resolve(
    raw: &str,
    token: &Token,
    record: &Value,
    calendar: &mut Option<CalendarParts>,
) -> Result<String, RecordError> {
    if let Token::Path { path, modulo, hash } = token {
        return resolve_path(raw, path, *modulo, *hash, record);
    }

    let parts = calendar_parts(raw, record, calendar)?;
    Ok(match token {
        Token::Date => parts.iso_date(),
        Token::Year => format!("{:04}", parts.year),
        Token::Month => format!("{:02}", parts.month),
        Token::Day => format!("{:02}", parts.day),
        _ => format!("{:02}", parts.hour),
    })
}

fn calendar_parts(
    raw: &str,
    record: &Value,
    cache: &mut Option<CalendarParts>,
) -> Result<CalendarParts, RecordError> {
    if let Some(parts) = cache {
        return Ok(*parts);
    }
    let created_at = match record.get("created_at") {
        Some(Value::String(text)) => text,
        Some(Value::Null) | None => {
            return Err(RecordError::routing(raw, "needs `created_at`, which is absent"));
        }
        Some(_) => return Err(RecordError::routing(raw, "needs `created_at` as a string")),
    };
    let parts = CalendarParts::from_created_at(created_at).ok_or_else(|| {
        RecordError::routing(raw, format!("cannot parse created_at `{created_at}`"))
    })?;
    *cache = Some(parts);
    Ok(parts)
}

fn lookup<'a>(record: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(record, |value, key| match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    })
}

/// First eight bytes of the SHA-256 digest, big-endian. Identical on every
/// target and toolchain, so shard numbers stay valid across machines.
fn shard_hash(rendered: &str) -> u64 {
    let digest = Sha256::digest(rendered.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

fn resolve_path(
    raw: &str,
    path: &[String],
    modulo: Option<u64>,
    hash: bool,
    record: &Value,
) -> Result<String, RecordError> {
    let value = match lookup(record, path) {
        None | Some(Value::Null) => return Err(RecordError::routing(raw, "is absent")),
        Some(value) => value,
    };

    let rendered = match value {
        Value::String(text) if text.is_empty() => {
            return Err(RecordError::routing(raw, "is empty"));
        }
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        _ => match NumericId::from_value(value) {
            // `{"$numberLong": "..."}` wrappers render as the plain id.
            Some(id) => id.to_string(),
            None => return Err(RecordError::routing(raw, "is not a scalar value")),
        },
    };

    let Some(modulo) = modulo else {
        return Ok(rendered);
    };

    if hash {
        return Ok((shard_hash(&rendered) % modulo).to_string());
    }

    let number = NumericId::from_value(value)
        .ok_or_else(|| RecordError::routing(raw, "is not an integer"))?;
    Ok(number.0.rem_euclid(modulo as i64).to_string())
}

/// Make a substituted value safe to use as one path component.
fn sanitize(value: &str) -> String {
    let mut out: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    let leading_dots = out.chars().take_while(|c| *c == '.').count();
    if leading_dots > 0 {
        out.replace_range(..leading_dots, &"_".repeat(leading_dots));
    }
    out
}

/// Open output stream of one shard.
enum ShardWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl ShardWriter {
    fn create(path: &Path, compress: bool) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = BufWriter::new(File::create(path)?);
        Ok(if compress {
            ShardWriter::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            ShardWriter::Plain(file)
        })
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let out: &mut dyn Write = match self {
            ShardWriter::Plain(writer) => writer,
            ShardWriter::Gzip(writer) => writer,
        };
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")
    }

    fn close(self) -> io::Result<()> {
        match self {
            ShardWriter::Plain(mut writer) => writer.flush(),
            ShardWriter::Gzip(writer) => writer.finish()?.flush(),
        }
    }
}

/// Output location and format of a router.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub output_dir: PathBuf,
    pub pattern: ShardPattern,
    pub compress: bool,
}

impl RouterOptions {
    pub fn extension(&self) -> &'static str {
        if self.compress {
            COMPRESSED_EXTENSION
        } else {
            PLAIN_EXTENSION
        }
    }

    pub fn shard_path(&self, shard: &str) -> PathBuf {
        self.output_dir.join(format!("{shard}.{}", self.extension()))
    }
}

/// Totals for one routing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Non-blank lines consumed.
    pub lines: u64,
    /// Records written, per shard name.
    pub shards: BTreeMap<String, u64>,
    pub skipped: BTreeMap<RecordErrorKind, u64>,
}

impl RouteReport {
    pub fn routed(&self) -> u64 {
        self.shards.values().sum()
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    pub fn skipped_of(&self, kind: RecordErrorKind) -> u64 {
        self.skipped.get(&kind).copied().unwrap_or(0)
    }

    /// Fold another report into this one.
    pub fn absorb(&mut self, other: RouteReport) {
        self.lines += other.lines;
        for (shard, count) in other.shards {
            *self.shards.entry(shard).or_default() += count;
        }
        for (kind, count) in other.skipped {
            *self.skipped.entry(kind).or_default() += count;
        }
    }
}

/// Single-pass router owning one lazily opened writer per shard.
///
/// Writers stay open until [`ChunkRouter::finish`]; dropping the router
/// without finishing still flushes them.
pub struct ChunkRouter {
    options: RouterOptions,
    writers: HashMap<String, ShardWriter>,
    report: RouteReport,
}

impl ChunkRouter {
    pub fn new(options: RouterOptions) -> Result<Self> {
        fs::create_dir_all(&options.output_dir).with_context(|| {
            format!("failed to create output directory {}", options.output_dir.display())
        })?;
        Ok(Self {
            options,
            writers: HashMap::new(),
            report: RouteReport::default(),
        })
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    pub fn report(&self) -> &RouteReport {
        &self.report
    }

    pub fn open_shards(&self) -> usize {
        self.writers.len()
    }

    /// Route one line. The inner error is record-scoped; the outer one is an
    /// output failure that should end the run.
    pub fn route_line(&mut self, line_no: u64, line: &str) -> Result<Result<String, RecordError>> {
        self.report.lines += 1;
        let shard = match parse_line(line).and_then(|record| self.options.pattern.shard_for(&record)) {
            Ok(shard) => shard,
            Err(err) => {
                warn!(line = line_no, kind = %err.kind(), error = %err, "skipping record");
                *self.report.skipped.entry(err.kind()).or_default() += 1;
                return Ok(Err(err));
            }
        };

        if !self.writers.contains_key(&shard) {
            let path = self.options.shard_path(&shard);
            debug!(shard = %shard, path = %path.display(), "opening shard");
            let writer = ShardWriter::create(&path, self.options.compress)
                .with_context(|| format!("failed to create shard file {}", path.display()))?;
            self.writers.insert(shard.clone(), writer);
        }
        if let Some(writer) = self.writers.get_mut(&shard) {
            writer
                .write_line(line)
                .with_context(|| format!("failed to write to shard {shard}"))?;
        }
        *self.report.shards.entry(shard.clone()).or_default() += 1;
        Ok(Ok(shard))
    }

    /// Route every line of an input, continuing past record-scoped errors.
    pub fn route_lines<I>(&mut self, lines: I) -> Result<&RouteReport>
    where
        I: IntoIterator<Item = io::Result<InputLine>>,
    {
        for line in lines {
            let InputLine { line_no, text } = line.context("failed to read input")?;
            match text {
                Ok(text) => {
                    let _ = self.route_line(line_no, &text)?;
                }
                Err(err) => {
                    self.report.lines += 1;
                    warn!(line = line_no, kind = %err.kind(), error = %err, "skipping record");
                    *self.report.skipped.entry(err.kind()).or_default() += 1;
                }
            }
        }
        Ok(&self.report)
    }

    /// Route every line of the given files, in order.
    pub fn route_files(&mut self, inputs: &[PathBuf]) -> Result<&RouteReport> {
        for path in inputs {
            let _span = info_span!("route_file", path = %path.display()).entered();
            self.route_lines(open_lines(path)?)?;
        }
        Ok(&self.report)
    }

    /// Close every shard writer and return the report.
    pub fn finish(mut self) -> Result<RouteReport> {
        for (shard, writer) in self.writers.drain() {
            writer
                .close()
                .with_context(|| format!("failed to close shard {shard}"))?;
        }
        Ok(std::mem::take(&mut self.report))
    }
}

/// Route a list of files with a single router.
#[instrument(skip_all, fields(pattern = %options.pattern, files = inputs.len()))]
pub fn chunk_files(inputs: &[PathBuf], options: RouterOptions) -> Result<RouteReport> {
    let mut router = ChunkRouter::new(options)?;
    router.route_files(inputs)?;
    let report = router.finish()?;
    info!(
        lines = report.lines,
        routed = report.routed(),
        shards = report.shards.len(),
        skipped = report.skipped_total(),
        "chunking finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shard(pattern: &str, record: Value) -> Result<String, RecordError> {
        ShardPattern::parse(pattern).unwrap().shard_for(&record)
    }

    #[test]
    fn test_parse_rejects_bad_patterns() {
        for bad in ["", "plain", "{", "{lang", "lang}", "{}", "{id%0}", "{id%x}", "{hash:id}", "{a..b}"] {
            assert!(ShardPattern::parse(bad).is_err(), "accepted `{bad}`");
        }
        assert!(ShardPattern::parse("{{literal}}-{lang}").is_ok());
    }

    #[test]
    fn test_date_tokens() {
        let record = json!({"created_at": "Wed Oct 10 20:19:24 +0000 2018"});
        assert_eq!(shard("{date}", record.clone()).unwrap(), "2018-10-10");
        assert_eq!(
            shard("{year}/{month}/{day}-{hour}", record).unwrap(),
            "2018/10/10-20"
        );
    }

    #[test]
    fn test_field_and_modulo_tokens() {
        let record = json!({"id": 1234, "lang": "en", "user": {"id": "77"}, "place": null});
        assert_eq!(shard("{lang}", record.clone()).unwrap(), "en");
        assert_eq!(shard("{id%10}", record.clone()).unwrap(), "4");
        assert_eq!(shard("{user.id%10}", record.clone()).unwrap(), "7");
        assert_eq!(shard("tweets-{lang}-{id}", record).unwrap(), "tweets-en-1234");
    }

    #[test]
    fn test_number_long_ids_route_like_plain_ids() {
        let plain = shard("{id%7}", json!({"id": 1_050_118_621_198_921_728_i64})).unwrap();
        let wrapped = shard("{id%7}", json!({"id": {"$numberLong": "1050118621198921728"}})).unwrap();
        assert_eq!(plain, wrapped);
    }

    #[test]
    fn test_hash_token_is_stable_and_bounded() {
        let record = json!({"user": {"screen_name": "someone"}});
        let first = shard("{hash:user.screen_name%8}", record.clone()).unwrap();
        let second = shard("{hash:user.screen_name%8}", record).unwrap();
        assert_eq!(first, second);
        assert!(first.parse::<u64>().unwrap() < 8);
    }

    #[test]
    fn test_hash_token_values_are_pinned() {
        let record = json!({"lang": "en", "user": {"id": 12345, "screen_name": "someone"}});
        assert_eq!(shard("{hash:user.screen_name%8}", record.clone()).unwrap(), "7");
        assert_eq!(shard("{hash:user.screen_name%1000}", record.clone()).unwrap(), "199");
        assert_eq!(shard("{hash:user.id%16}", record.clone()).unwrap(), "10");
        assert_eq!(shard("{hash:lang%1000}", record).unwrap(), "598");
    }

    #[test]
    fn test_missing_fields_are_routing_errors() {
        for (pattern, record) in [
            ("{lang}", json!({"id": 1})),
            ("{lang}", json!({"lang": null})),
            ("{lang}", json!({"lang": ""})),
            ("{place.country_code}", json!({"place": null})),
            ("{user}", json!({"user": {"id": 1}})),
            ("{date}", json!({"id": 1})),
            ("{date}", json!({"created_at": "yesterday"})),
            ("{lang%4}", json!({"lang": "en"})),
        ] {
            let err = shard(pattern, record).unwrap_err();
            assert_eq!(err.kind(), RecordErrorKind::Routing, "{pattern}");
        }
    }

    #[test]
    fn test_values_cannot_escape_the_output_directory() {
        let record = json!({"lang": "../../etc/passwd"});
        assert_eq!(shard("{lang}", record).unwrap(), "___.._etc_passwd");
        assert_eq!(sanitize(".hidden"), "_hidden");
    }

    #[test]
    fn test_router_writes_lines_verbatim_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let options = RouterOptions {
            output_dir: dir.path().to_path_buf(),
            pattern: ShardPattern::parse("{lang}").unwrap(),
            compress: false,
        };
        let mut router = ChunkRouter::new(options).unwrap();
        let lines = [
            r#"{"id":1, "lang":"en"}"#,
            r#"{"id":2,"lang":"es"}"#,
            r#"{ "id" : 3, "lang":"en" }"#,
            r#"{"id":4}"#,
        ];
        for (idx, line) in lines.iter().enumerate() {
            router.route_line(idx as u64 + 1, line).unwrap().ok();
        }
        assert_eq!(router.open_shards(), 2);
        let report = router.finish().unwrap();

        assert_eq!(report.lines, 4);
        assert_eq!(report.routed(), 3);
        assert_eq!(report.skipped_of(RecordErrorKind::Routing), 1);

        let en = fs::read_to_string(dir.path().join("en.json")).unwrap();
        assert_eq!(en, format!("{}\n{}\n", lines[0], lines[2]));
        let es = fs::read_to_string(dir.path().join("es.json")).unwrap();
        assert_eq!(es, format!("{}\n", lines[1]));
    }
}
