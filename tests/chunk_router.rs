use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use geotweets_rs::test_support::{generate_tweets, write_ndjson};
use geotweets_rs::{
    chunk_parallel, ChunkRouter, InputLine, ParallelOptions, RecordErrorKind, RouterOptions,
    ShardPattern,
};
use walkdir::WalkDir;

fn options(output_dir: &Path, pattern: &str, compress: bool) -> RouterOptions {
    RouterOptions {
        output_dir: output_dir.to_path_buf(),
        pattern: ShardPattern::parse(pattern).unwrap(),
        compress,
    }
}

/// Every shard file under `dir`, keyed by relative path, decompressed.
fn read_shards(dir: &Path) -> BTreeMap<PathBuf, String> {
    let mut out = BTreeMap::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.unwrap();
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let raw = fs::read(path).unwrap();
        let text = if path.extension().is_some_and(|ext| ext == "gz") {
            let mut text = String::new();
            MultiGzDecoder::new(raw.as_slice())
                .read_to_string(&mut text)
                .unwrap();
            text
        } else {
            String::from_utf8(raw).unwrap()
        };
        out.insert(path.strip_prefix(dir).unwrap().to_path_buf(), text);
    }
    out
}

fn write_parts(dir: &Path, lines: &[String], per_file: usize) -> Vec<PathBuf> {
    lines
        .chunks(per_file)
        .enumerate()
        .map(|(idx, lines)| {
            let path = dir.join(format!("part-{idx:02}.json.gz"));
            write_ndjson(&path, lines, true).unwrap();
            path
        })
        .collect()
}

#[test]
fn lang_pattern_scenario() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let lines = [
        r#"{"id":1,"lang":"en"}"#,
        r#"{"id":2,"lang":"es"}"#,
        r#"{"id":3,"lang":"en"}"#,
    ];
    let mut router = ChunkRouter::new(options(dir.path(), "{lang}", true))?;
    router.route_lines(
        lines
            .iter()
            .enumerate()
            .map(|(idx, line)| Ok(InputLine::new(idx as u64 + 1, line.to_string()))),
    )?;
    let report = router.finish()?;

    assert_eq!(report.shards.get("en"), Some(&2));
    assert_eq!(report.shards.get("es"), Some(&1));

    let shards = read_shards(dir.path());
    assert_eq!(
        shards[&PathBuf::from("en.json.gz")],
        format!("{}\n{}\n", lines[0], lines[2])
    );
    assert_eq!(shards[&PathBuf::from("es.json.gz")], format!("{}\n", lines[1]));
    Ok(())
}

#[test]
fn routing_conserves_records_and_is_deterministic() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dataset = generate_tweets(600, 0.05, 21);
    let input = dir.path().join("input.json.gz");
    write_ndjson(&input, &dataset.lines, true)?;

    let pattern = "{place.country_code}/{date}-{hash:user.id%4}";
    let run = |name: &str| -> anyhow::Result<_> {
        let out = dir.path().join(name);
        let mut router = ChunkRouter::new(options(&out, pattern, false))?;
        router.route_files(&[input.clone()])?;
        Ok((router.finish()?, read_shards(&out)))
    };
    let (first_report, first) = run("first")?;
    let (second_report, second) = run("second")?;

    assert_eq!(first, second);
    assert_eq!(first_report, second_report);

    // Tweets without a place cannot be routed by country.
    let routed: usize = first.values().map(|text| text.lines().count()).sum();
    assert_eq!(routed as u64, first_report.routed());
    assert_eq!(
        first_report.routed() + first_report.skipped_of(RecordErrorKind::Routing),
        dataset.lines.len() as u64
    );
    assert!(first.keys().all(|path| path.components().count() == 2));
    Ok(())
}

#[test]
fn parallel_jobs_match_a_single_router() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dataset = generate_tweets(900, 0.0, 4);
    let inputs = write_parts(dir.path(), &dataset.lines, 100);

    let single = dir.path().join("single");
    let parallel = dir.path().join("parallel");
    let temp_dir = dir.path().join("tmp");

    let single_report = chunk_parallel(
        &inputs,
        &ParallelOptions {
            router: options(&single, "{lang}", true),
            jobs: 1,
            temp_dir: temp_dir.clone(),
            keep_temporary_files: false,
        },
    )?;
    let parallel_report = chunk_parallel(
        &inputs,
        &ParallelOptions {
            router: options(&parallel, "{lang}", true),
            jobs: 4,
            temp_dir: temp_dir.clone(),
            keep_temporary_files: false,
        },
    )?;

    assert_eq!(single_report, parallel_report);
    assert_eq!(read_shards(&single), read_shards(&parallel));
    assert!(!temp_dir.exists());

    let expected: BTreeMap<String, u64> = dataset
        .langs
        .iter()
        .map(|(lang, count)| (lang.clone(), *count as u64))
        .collect();
    assert_eq!(parallel_report.shards, expected);
    Ok(())
}

#[test]
fn parallel_runs_leave_foreign_partitions_alone() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dataset = generate_tweets(200, 0.0, 9);
    let inputs = write_parts(dir.path(), &dataset.lines, 50);

    // Left behind by another run sharing the same temp dir.
    let temp_dir = dir.path().join("tmp");
    let foreign = temp_dir.join("partition-0").join("other-run.json.gz");
    fs::create_dir_all(foreign.parent().unwrap())?;
    fs::write(&foreign, b"not ours")?;

    let out = dir.path().join("out");
    let report = chunk_parallel(
        &inputs,
        &ParallelOptions {
            router: options(&out, "{lang}", true),
            jobs: 2,
            temp_dir: temp_dir.clone(),
            keep_temporary_files: false,
        },
    )?;

    assert_eq!(fs::read(&foreign)?, b"not ours");
    let leftovers: Vec<_> = fs::read_dir(&temp_dir)?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect::<Result<_, _>>()?;
    assert_eq!(leftovers, vec![std::ffi::OsString::from("partition-0")]);

    let shards = read_shards(&out);
    assert!(!shards.keys().any(|path| path.ends_with("other-run.json.gz")));
    let routed: usize = shards.values().map(|text| text.lines().count()).sum();
    assert_eq!(routed, dataset.lines.len());
    assert_eq!(report.routed(), dataset.lines.len() as u64);
    Ok(())
}

#[test]
fn failed_job_is_reported_after_all_jobs_finish() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dataset = generate_tweets(120, 0.0, 5);
    let mut inputs = write_parts(dir.path(), &dataset.lines, 40);
    inputs.insert(0, dir.path().join("missing.json"));

    let temp_dir = dir.path().join("tmp");
    let result = chunk_parallel(
        &inputs,
        &ParallelOptions {
            router: options(&dir.path().join("out"), "{lang}", false),
            jobs: 2,
            temp_dir: temp_dir.clone(),
            keep_temporary_files: false,
        },
    );

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("missing.json"));
    // The healthy job finished and its partition was cleaned up with the rest.
    assert_eq!(fs::read_dir(&temp_dir)?.count(), 0);
    Ok(())
}

#[test]
fn invalid_pattern_is_rejected_before_routing() {
    assert!(ShardPattern::parse("{date").is_err());
    assert!(ShardPattern::parse("{id%0}").is_err());
}
