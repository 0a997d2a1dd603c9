use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use tracing::warn;

use tansu_core::error::Result;

use super::file::{read_record, ReadOutcome};
use super::types::WalRecord;

/// Streaming iterator over commit log records across segment files.
///
/// Truncated tails end a segment silently; a checksum failure abandons the
/// remainder of that segment and moves on to the next one.
pub struct WalRecordIterator {
    paths: Vec<PathBuf>,
    current_idx: usize,
    reader: Option<BufReader<File>>,
}

impl WalRecordIterator {
    pub(crate) fn new(paths: Vec<PathBuf>) -> Self {
        let mut iter = Self {
            paths,
            current_idx: 0,
            reader: None,
        };
        iter.open_next_file();
        iter
    }

    fn open_next_file(&mut self) {
        while self.current_idx < self.paths.len() {
            let path = &self.paths[self.current_idx];
            self.current_idx += 1;
            match File::open(path) {
                Ok(file) => {
                    self.reader = Some(BufReader::new(file));
                    return;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable segment");
                }
            }
        }
        self.reader = None;
    }

    fn current_path(&self) -> &PathBuf {
        &self.paths[self.current_idx - 1]
    }
}

impl Iterator for WalRecordIterator {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            match read_record(reader) {
                Ok(ReadOutcome::Record(record)) => return Some(Ok(record)),
                Ok(ReadOutcome::End) => {
                    self.open_next_file();
                }
                Ok(ReadOutcome::Corrupt { expected, actual }) => {
                    warn!(
                        path = %self.current_path().display(),
                        expected, actual,
                        "checksum mismatch; ignoring remainder of segment"
                    );
                    self.open_next_file();
                }
                Err(e) => {
                    self.reader = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
