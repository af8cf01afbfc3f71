//! # Parallel Chunking
//!
//! Splits the input list into contiguous slices, routes each slice on its own
//! thread into a private partition directory, then concatenates same-named
//! shard files across partitions in partition order.
//!
//! Slices are contiguous and merged in order, so every shard ends up with its
//! records in input order, exactly as a single router would have written
//! them. Concatenated gzip members still form one valid gzip stream.

use crate::input::files_under;
use crate::router::{chunk_files, RouteReport, RouterOptions};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Settings of a multi-job chunking run.
#[derive(Debug, Clone)]
pub struct ParallelOptions {
    pub router: RouterOptions,
    pub jobs: usize,
    /// Parent of the per-run `partition-*` directories. Concurrent runs may
    /// share it; each job gets a uniquely named partition.
    pub temp_dir: PathBuf,
    pub keep_temporary_files: bool,
}

/// Split `inputs` into at most `jobs` contiguous slices whose lengths differ
/// by at most one. Empty slices are never produced.
pub fn split_inputs<T: Clone>(inputs: &[T], jobs: usize) -> Vec<Vec<T>> {
    let jobs = jobs.max(1).min(inputs.len());
    if jobs == 0 {
        return Vec::new();
    }
    let base = inputs.len() / jobs;
    let extra = inputs.len() % jobs;

    let mut slices = Vec::with_capacity(jobs);
    let mut start = 0;
    for idx in 0..jobs {
        let len = base + usize::from(idx < extra);
        slices.push(inputs[start..start + len].to_vec());
        start += len;
    }
    slices
}

/// Route `inputs` with up to `options.jobs` threads.
///
/// A single job writes straight into the output directory.
#[instrument(skip_all, fields(jobs = options.jobs, files = inputs.len()))]
pub fn chunk_parallel(inputs: &[PathBuf], options: &ParallelOptions) -> Result<RouteReport> {
    let slices = split_inputs(inputs, options.jobs);
    if slices.len() <= 1 {
        return chunk_files(inputs, options.router.clone());
    }

    let created_temp_dir = !options.temp_dir.exists();
    fs::create_dir_all(&options.temp_dir)
        .with_context(|| format!("failed to create {}", options.temp_dir.display()))?;

    let mut partitions = Vec::with_capacity(slices.len());
    for _ in 0..slices.len() {
        let partition = tempfile::Builder::new()
            .prefix("partition-")
            .keep(options.keep_temporary_files)
            .tempdir_in(&options.temp_dir)
            .with_context(|| {
                format!("failed to create a partition in {}", options.temp_dir.display())
            })?;
        partitions.push(partition);
    }

    let mut handles = Vec::with_capacity(slices.len());
    for (slice, partition) in slices.into_iter().zip(&partitions) {
        let router = RouterOptions {
            output_dir: partition.path().to_path_buf(),
            ..options.router.clone()
        };
        handles.push(std::thread::spawn(move || chunk_files(&slice, router)));
    }

    // Every job is joined before the first failure is reported.
    let mut report = RouteReport::default();
    let mut first_error = None;
    for (idx, handle) in handles.into_iter().enumerate() {
        let outcome = handle
            .join()
            .map_err(|_| anyhow!("chunking job {idx} panicked"))
            .and_then(|result| result.with_context(|| format!("chunking job {idx} failed")));
        match outcome {
            Ok(partial) => report.absorb(partial),
            Err(err) => {
                warn!(job = idx, error = %err, "chunking job failed");
                first_error.get_or_insert(err);
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    let partition_paths: Vec<PathBuf> = partitions
        .iter()
        .map(|partition| partition.path().to_path_buf())
        .collect();
    merge_partitions(
        &partition_paths,
        &options.router.output_dir,
        options.keep_temporary_files,
    )?;
    drop(partitions);
    if created_temp_dir && !options.keep_temporary_files {
        // Fails while another run still has partitions in it.
        let _ = fs::remove_dir(&options.temp_dir);
    }

    info!(
        lines = report.lines,
        routed = report.routed(),
        shards = report.shards.len(),
        skipped = report.skipped_total(),
        "parallel chunking finished"
    );
    Ok(report)
}

/// What [`merge_partitions`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Shards present in exactly one partition.
    pub moved: usize,
    /// Shards concatenated from several partitions.
    pub concatenated: usize,
}

/// Combine partition directories into `output_dir`.
///
/// Shard files are matched by their path relative to the partition root.
/// Partitions are removed afterwards unless `keep` is set.
#[instrument(skip_all, fields(partitions = partitions.len()))]
pub fn merge_partitions(partitions: &[PathBuf], output_dir: &Path, keep: bool) -> Result<MergeReport> {
    let mut shards: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for partition in partitions {
        if !partition.exists() {
            continue;
        }
        for file in files_under(partition)? {
            let relative = file
                .strip_prefix(partition)
                .with_context(|| format!("{} escaped its partition", file.display()))?
                .to_path_buf();
            shards.entry(relative).or_default().push(file);
        }
    }

    let mut report = MergeReport::default();
    for (relative, sources) in shards {
        let target = output_dir.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        if let [source] = sources.as_slice() {
            debug!(shard = %relative.display(), "moving shard");
            let placed = if keep {
                fs::copy(source, &target)
            } else {
                move_file(source, &target)
            };
            placed.with_context(|| format!("failed to place shard {}", target.display()))?;
            report.moved += 1;
            continue;
        }

        debug!(shard = %relative.display(), parts = sources.len(), "concatenating shard");
        let mut out = BufWriter::new(
            File::create(&target)
                .with_context(|| format!("failed to create {}", target.display()))?,
        );
        for source in &sources {
            let mut input = File::open(source)
                .with_context(|| format!("failed to open {}", source.display()))?;
            io::copy(&mut input, &mut out)
                .with_context(|| format!("failed to append {}", source.display()))?;
        }
        out.flush()?;
        if !keep {
            for source in &sources {
                fs::remove_file(source)
                    .with_context(|| format!("failed to remove {}", source.display()))?;
            }
        }
        report.concatenated += 1;
    }

    if !keep {
        for partition in partitions {
            if partition.exists() {
                if let Err(err) = fs::remove_dir_all(partition) {
                    warn!(partition = %partition.display(), error = %err, "failed to remove partition");
                }
            }
        }
    }
    Ok(report)
}

/// Rename, falling back to copy and delete across filesystems.
fn move_file(source: &Path, target: &Path) -> io::Result<u64> {
    match fs::rename(source, target) {
        Ok(()) => Ok(0),
        Err(_) => {
            let copied = fs::copy(source, target)?;
            fs::remove_file(source)?;
            Ok(copied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_inputs_is_contiguous_and_balanced() {
        let inputs: Vec<u32> = (0..7).collect();
        let slices = split_inputs(&inputs, 3);
        assert_eq!(slices, vec![vec![0, 1, 2], vec![3, 4], vec![5, 6]]);

        assert_eq!(split_inputs(&inputs, 0), vec![inputs.clone()]);
        assert_eq!(split_inputs(&inputs[..2], 5).len(), 2);
        assert!(split_inputs::<u32>(&[], 4).is_empty());
    }

    #[test]
    fn test_merge_concatenates_in_partition_order() {
        let dir = tempfile::tempdir().unwrap();
        let p0 = dir.path().join("partition-0");
        let p1 = dir.path().join("partition-1");
        let out = dir.path().join("out");
        fs::create_dir_all(p0.join("en")).unwrap();
        fs::create_dir_all(&p1).unwrap();
        fs::write(p0.join("a.json"), "1\n2\n").unwrap();
        fs::write(p1.join("a.json"), "3\n").unwrap();
        fs::write(p0.join("en").join("b.json"), "4\n").unwrap();

        let report = merge_partitions(&[p0.clone(), p1.clone()], &out, false).unwrap();
        assert_eq!(report, MergeReport { moved: 1, concatenated: 1 });
        assert_eq!(fs::read_to_string(out.join("a.json")).unwrap(), "1\n2\n3\n");
        assert_eq!(fs::read_to_string(out.join("en").join("b.json")).unwrap(), "4\n");
        assert!(!p0.exists());
        assert!(!p1.exists());
    }

    #[test]
    fn test_merge_keeps_partitions_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let p0 = dir.path().join("partition-0");
        fs::create_dir_all(&p0).unwrap();
        fs::write(p0.join("a.json"), "1\n").unwrap();

        merge_partitions(&[p0.clone()], &dir.path().join("out"), true).unwrap();
        assert!(p0.join("a.json").exists());
        assert!(dir.path().join("out").join("a.json").exists());
    }
}
