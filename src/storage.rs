//! Append-only record store for telemetry samples.
//!
//! Records have no timestamp: their position in the store is the only
//! ordering key. The file layout is one record per line, two
//! whitespace-separated floats:
//!
//! ```text
//! 21.4 52.0
//! 23.9 57.0
//! ```

use crate::error::StoreError;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, trace, warn};

/// A single telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    pub temperature: f64,
    pub humidity: f64,
}

impl Record {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity,
        }
    }
}

/// Append/read access to the insertion-ordered record sequence.
pub trait RecordStore: Send + Sync {
    /// Append one record at the end of the store.
    fn append(&self, record: Record) -> Result<(), StoreError>;

    /// Load every record in insertion order.
    fn load(&self) -> Result<Vec<Record>, StoreError>;
}

/// Record store backed by a flat text file.
pub struct FileStore {
    path: PathBuf,
    /// Serializes appends so concurrent writers never interleave lines
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl RecordStore for FileStore {
    fn append(&self, record: Record) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        writeln!(file, "{} {}", record.temperature, record.humidity)
            .map_err(|e| self.io_error(e))?;

        trace!(?record, path = %self.path.display(), "Appended record");
        Ok(())
    }

    fn load(&self) -> Result<Vec<Record>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Record file missing, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let records = parse_records(&contents);
        debug!(count = records.len(), path = %self.path.display(), "Loaded records");
        Ok(records)
    }
}

/// Scan whitespace-separated numeric pairs until the first token that is
/// not a number or a dangling unpaired value.
fn parse_records(contents: &str) -> Vec<Record> {
    let mut tokens = contents.split_whitespace();
    let mut records = Vec::new();

    loop {
        let (Some(a), Some(b)) = (tokens.next(), tokens.next()) else {
            break;
        };
        match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(temperature), Ok(humidity)) => records.push(Record::new(temperature, humidity)),
            _ => {
                warn!(token_a = a, token_b = b, "Stopping record scan at malformed entry");
                break;
            }
        }
    }

    records
}

/// In-memory record store.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryStore {
    fn append(&self, record: Record) -> Result<(), StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .push(record);
        Ok(())
    }

    fn load(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.records.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }
}
