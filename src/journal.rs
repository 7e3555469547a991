//! Append-only persistence for raw observations and usage events.
//!
//! [`LogSink`] is the seam the pipeline writes through. [`CsvJournal`] is
//! the production sink: two CSV files, each created with its header on first
//! use and only ever appended to afterwards. [`MemoryJournal`] keeps records
//! in vectors for tests.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::models::{RawObservation, UsageEvent, COUNTS_LOG_COLUMNS, RAW_LOG_COLUMNS};

// ---

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error on {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Destination for the two record streams.
///
/// Implementations must make a record durable (at least handed to the OS)
/// before returning `Ok`.
pub trait LogSink {
    fn append_raw(&mut self, record: &RawObservation) -> Result<(), JournalError>;

    fn append_event(&mut self, record: &UsageEvent) -> Result<(), JournalError>;
}

/// Append target that can be cut back to an earlier length.
trait Truncate: Write {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// One CSV file opened for appending.
///
/// Every row is encoded in full before it is written, and a failed write is
/// cut back to the previous length, so a row either lands whole or not at all.
struct LogFile<W> {
    path: PathBuf,
    target: W,
    /// Bytes known to be on disk.
    len: u64,
}

impl LogFile<File> {
    /// Open `path` for appending, writing `header` only if the file is new or empty.
    fn open(path: &Path, header: &[&str]) -> Result<Self, JournalError> {
        // ---
        let io_err = |source| JournalError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();

        let mut log = Self {
            path: path.to_path_buf(),
            target: file,
            len,
        };

        if len == 0 {
            log.write_row(|w| w.write_record(header))?;
            tracing::info!("Initialized {} with header", path.display());
        } else {
            tracing::debug!("Appending to existing {}", path.display());
        }

        Ok(log)
    }
}

impl<W: Truncate> LogFile<W> {
    fn append<T: serde::Serialize>(&mut self, record: &T) -> Result<(), JournalError> {
        self.write_row(|w| w.serialize(record))
    }

    fn write_row<F>(&mut self, encode: F) -> Result<(), JournalError>
    where
        F: FnOnce(&mut csv::Writer<Vec<u8>>) -> csv::Result<()>,
    {
        // ---
        let mut encoder = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        encode(&mut encoder).map_err(|e| self.csv_err(e))?;
        encoder.flush().map_err(|e| self.csv_err(e.into()))?;
        let row = encoder.get_ref();

        let written = self.target.write_all(row).and_then(|()| self.target.flush());
        if let Err(source) = written {
            if let Err(e) = self.target.truncate(self.len) {
                tracing::error!(
                    "Cannot cut {} back to {} bytes after failed append: {}",
                    self.path.display(),
                    self.len,
                    e
                );
            }
            return Err(JournalError::Io {
                path: self.path.clone(),
                source,
            });
        }

        self.len += row.len() as u64;
        Ok(())
    }

    fn csv_err(&self, source: csv::Error) -> JournalError {
        JournalError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

/// The raw log and the counts log as CSV files.
pub struct CsvJournal {
    raw: LogFile<File>,
    counts: LogFile<File>,
}

impl CsvJournal {
    /// Open (creating if needed) both logs. Existing rows are never rewritten.
    pub fn open(raw_path: &Path, counts_path: &Path) -> Result<Self, JournalError> {
        Ok(Self {
            raw: LogFile::open(raw_path, &RAW_LOG_COLUMNS)?,
            counts: LogFile::open(counts_path, &COUNTS_LOG_COLUMNS)?,
        })
    }
}

impl LogSink for CsvJournal {
    fn append_raw(&mut self, record: &RawObservation) -> Result<(), JournalError> {
        self.raw.append(record)
    }

    fn append_event(&mut self, record: &UsageEvent) -> Result<(), JournalError> {
        self.counts.append(record)
    }
}

/// In-memory sink; records are kept in append order.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    pub raw: Vec<RawObservation>,
    pub events: Vec<UsageEvent>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogSink for MemoryJournal {
    fn append_raw(&mut self, record: &RawObservation) -> Result<(), JournalError> {
        self.raw.push(record.clone());
        Ok(())
    }

    fn append_event(&mut self, record: &UsageEvent) -> Result<(), JournalError> {
        self.events.push(record.clone());
        Ok(())
    }
}
