//! # Input Module
//!
//! Line sources for both pipelines: plain or gzip-compressed NDJSON files,
//! directories of such files, or any in-memory reader.

use crate::error::RecordError;
use anyhow::{Context, Result};
use flate2::bufread::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One physical line of input. `line_no` is 1-based and counts blank lines.
#[derive(Debug)]
pub struct InputLine {
    pub line_no: u64,
    /// The line without its terminator, or a decode error when it is not UTF-8.
    pub text: Result<String, RecordError>,
}

impl InputLine {
    pub fn new(line_no: u64, text: String) -> Self {
        Self {
            line_no,
            text: Ok(text),
        }
    }
}

/// Iterator over the non-blank lines of a reader.
pub struct LineReader {
    reader: Box<dyn BufRead + Send>,
    line_no: u64,
    buf: Vec<u8>,
}

impl LineReader {
    pub fn new(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            line_no: 0,
            buf: Vec::new(),
        }
    }
}

impl Iterator for LineReader {
    type Item = io::Result<InputLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(err)),
            }
            self.line_no += 1;

            let mut end = self.buf.len();
            if self.buf[..end].ends_with(b"\n") {
                end -= 1;
            }
            if self.buf[..end].ends_with(b"\r") {
                end -= 1;
            }
            let bytes = &self.buf[..end];
            if bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let text = std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(RecordError::decode);
            return Some(Ok(InputLine {
                line_no: self.line_no,
                text,
            }));
        }
    }
}

/// Open a file for line reading, transparently decompressing gzip input.
pub fn open_lines(path: impl AsRef<Path>) -> Result<LineReader> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let is_gzip = reader
        .fill_buf()
        .with_context(|| format!("failed to read {}", path.display()))?
        .starts_with(&GZIP_MAGIC);

    if is_gzip {
        Ok(LineReader::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(LineReader::new(reader))
    }
}

/// Replace directories with the files beneath them. Each directory is walked
/// depth-first with entries sorted by file name.
pub fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(files_under(path)?);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

/// Regular files below `dir`, in sorted depth-first order.
pub(crate) fn files_under(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
