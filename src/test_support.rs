//! Seeded synthetic tweet streams for tests and benchmarks.

use flate2::write::GzEncoder;
use flate2::Compression;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use time::OffsetDateTime;

use crate::temporal::{format_created_at, SNOWFLAKE_EPOCH_MS};

/// 2018-10-10T00:00:00Z
const BASE_EPOCH_MS: i64 = 1_539_129_600_000;

const LANGS: [&str; 5] = ["en", "es", "fr", "ja", "pt"];

const PLACES: [(&str, &str, &str, [f64; 4]); 4] = [
    ("01a9a39529b27f36", "United States", "US", [-74.03, 40.54, -73.83, 40.74]),
    ("0a0de7bd49ef942d", "Spain", "ES", [-3.89, 40.31, -3.52, 40.64]),
    ("09f6a7707f18e0b1", "France", "FR", [2.22, 48.81, 2.47, 48.90]),
    ("1bd6e8a3a2b4b1c4", "Japan", "JP", [139.56, 35.52, 139.92, 35.82]),
];

#[derive(Debug, Clone, Default)]
pub struct GeneratedDataset {
    /// NDJSON lines, duplicates included.
    pub lines: Vec<String>,
    /// Distinct tweet ids.
    pub tweets: usize,
    /// Lines that repeat an earlier tweet verbatim.
    pub duplicates: usize,
    pub users: BTreeSet<i64>,
    pub places: BTreeSet<String>,
    /// Url, media, hashtag and mention rows of the distinct tweets.
    pub children: usize,
    /// Lines per `lang`, duplicates included.
    pub langs: BTreeMap<String, usize>,
}

/// Generate `count` tweet lines. Each line after the first repeats an
/// earlier tweet with probability `duplicate_probability`.
pub fn generate_tweets(count: u32, duplicate_probability: f64, seed: u64) -> GeneratedDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let user_pool = (count / 4).max(1) as i64;
    let mut dataset = GeneratedDataset::default();
    let mut originals: Vec<(String, String)> = Vec::new();

    for i in 0..count as i64 {
        if !originals.is_empty() && rng.random_bool(duplicate_probability) {
            let (line, lang) = originals[rng.random_range(0..originals.len())].clone();
            *dataset.langs.entry(lang).or_default() += 1;
            dataset.lines.push(line);
            dataset.duplicates += 1;
            continue;
        }

        let epoch_ms = BASE_EPOCH_MS + i * 37_000 + rng.random_range(0..1000);
        let id = ((epoch_ms - SNOWFLAKE_EPOCH_MS) << 22) | (i & 0xfff);
        let created_at = OffsetDateTime::from_unix_timestamp(epoch_ms / 1000)
            .ok()
            .and_then(format_created_at)
            .unwrap_or_default();

        let user_id = rng.random_range(1..=user_pool);
        let lang = LANGS[rng.random_range(0..LANGS.len())];

        let mut tweet = json!({
            "id": id,
            "id_str": id.to_string(),
            "created_at": created_at,
            "lang": lang,
            "text": format!("synthetic tweet {i}"),
            "user": {
                "id": user_id,
                "name": format!("User {user_id}"),
                "screen_name": format!("user{user_id}"),
                "verified": rng.random_bool(0.05),
                "followers_count": rng.random_range(0..10_000),
                "statuses_count": rng.random_range(1..50_000),
                "lang": lang,
            },
            "place": null,
            "coordinates": null,
        });

        if rng.random_bool(0.6) {
            let (place_id, country, code, [min_lon, min_lat, max_lon, max_lat]) =
                PLACES[rng.random_range(0..PLACES.len())];
            tweet["place"] = json!({
                "id": place_id,
                "country": country,
                "country_code": code,
                "place_type": "city",
                "bounding_box": {
                    "type": "Polygon",
                    "coordinates": [[
                        [min_lon, min_lat],
                        [min_lon, max_lat],
                        [max_lon, max_lat],
                        [max_lon, min_lat]
                    ]]
                }
            });
            if rng.random_bool(0.5) {
                let lon = rng.random_range(min_lon..max_lon);
                let lat = rng.random_range(min_lat..max_lat);
                tweet["coordinates"] = json!({"type": "Point", "coordinates": [lon, lat]});
            }
            dataset.places.insert(place_id.to_string());
        }

        let hashtags: Vec<Value> = (0..rng.random_range(0..3))
            .map(|n| json!({"text": format!("tag{n}"), "indices": [0, 4]}))
            .collect();
        let urls: Vec<Value> = (0..rng.random_range(0..2))
            .map(|n| {
                json!({
                    "url": format!("https://t.co/{i}x{n}"),
                    "expanded_url": format!("https://example.com/{i}/{n}")
                })
            })
            .collect();
        let mentions: Vec<Value> = (0..rng.random_range(0..2))
            .map(|_| {
                let mentioned = rng.random_range(1..=user_pool * 2);
                json!({"id": mentioned, "screen_name": format!("user{mentioned}")})
            })
            .collect();
        dataset.children += hashtags.len() + urls.len() + mentions.len();
        tweet["entities"] = json!({
            "hashtags": hashtags,
            "urls": urls,
            "user_mentions": mentions,
        });

        let line = tweet.to_string();
        dataset.users.insert(user_id);
        dataset.tweets += 1;
        *dataset.langs.entry(lang.to_string()).or_default() += 1;
        originals.push((line.clone(), lang.to_string()));
        dataset.lines.push(line);
    }

    dataset
}

/// Write lines as an NDJSON file, gzip-compressed when `gzip` is set.
pub fn write_ndjson(path: &Path, lines: &[String], gzip: bool) -> io::Result<()> {
    let file = BufWriter::new(File::create(path)?);
    if gzip {
        let mut encoder = GzEncoder::new(file, Compression::fast());
        write_lines(&mut encoder, lines)?;
        encoder.finish()?.flush()
    } else {
        let mut file = file;
        write_lines(&mut file, lines)?;
        file.flush()
    }
}

fn write_lines(out: &mut impl Write, lines: &[String]) -> io::Result<()> {
    for line in lines {
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
    }
    Ok(())
}
