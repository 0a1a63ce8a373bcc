//! CSV-backed ledger of per-URL fetch metadata.
//!
//! One row per URL under a fixed header. Inserts append; updates rewrite the
//! whole file through a temp file and an atomic rename, keeping every other
//! row and the row order as they were.

use chrono::{DateTime, SecondsFormat, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::file_manager::write_atomic;

pub const LEDGER_HEADER: [&str; 4] = ["url", "num_images", "num_links", "last_fetch"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub url: String,
    pub num_images: usize,
    pub num_links: usize,
    pub last_fetch: DateTime<Utc>,
}

impl LedgerRecord {
    /// A record stamped with the current time.
    pub fn new(url: &str, num_images: usize, num_links: usize) -> Self {
        Self {
            url: url.to_string(),
            num_images,
            num_links,
            last_fetch: Utc::now(),
        }
    }

    fn to_row(&self) -> StringRecord {
        StringRecord::from(vec![
            self.url.clone(),
            self.num_images.to_string(),
            self.num_links.to_string(),
            self.last_fetch.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ])
    }
}

impl fmt::Display for LedgerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} images={} links={} last_fetch={}",
            self.url,
            self.num_images,
            self.num_links,
            self.last_fetch.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to access ledger {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse ledger {path:?}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("ledger {path:?} has an unexpected header {found:?}")]
    BadHeader { path: PathBuf, found: Vec<String> },
    #[error("ledger has no record for {0}")]
    MissingRecord(String),
    #[error("ledger already has a record for {0}")]
    DuplicateRecord(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(LedgerRecord),
    Updated(LedgerRecord),
}

impl UpsertOutcome {
    pub fn record(&self) -> &LedgerRecord {
        match self {
            UpsertOutcome::Inserted(record) | UpsertOutcome::Updated(record) => record,
        }
    }
}

/// Handle on a ledger file. The file is created on first insert.
///
/// There is no file locking; callers that share a ledger between tasks must
/// serialize mutations themselves.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The record for `url`, or `None` when there is none or the file does not exist yet.
    pub fn lookup(&self, url: &str) -> Result<Option<LedgerRecord>, LedgerError> {
        let header = header_record();

        for row in self.read_rows()? {
            if row.get(0) == Some(url) {
                return self.parse_row(&row, &header).map(Some);
            }
        }

        Ok(None)
    }

    /// Every record in file order.
    pub fn records(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        let header = header_record();
        self.read_rows()?
            .iter()
            .map(|row| self.parse_row(row, &header))
            .collect()
    }

    /// Appends `record`, writing the header first when the file is new or empty.
    pub fn insert(&self, record: &LedgerRecord) -> Result<(), LedgerError> {
        if self.lookup(&record.url)?.is_some() {
            return Err(LedgerError::DuplicateRecord(record.url.clone()));
        }

        let needs_header = match fs::metadata(&self.path) {
            Ok(metadata) => metadata.len() == 0,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => return Err(self.io_error(e)),
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);

        if needs_header {
            writer
                .write_record(LEDGER_HEADER)
                .map_err(|e| self.csv_error(e))?;
        }
        writer
            .write_record(&record.to_row())
            .map_err(|e| self.csv_error(e))?;
        writer.flush().map_err(|e| self.io_error(e))?;

        Ok(())
    }

    /// Replaces the counts of an existing row and stamps it with the current time.
    ///
    /// Fails with [`LedgerError::MissingRecord`] without touching the file when
    /// `url` has no row.
    pub fn update(
        &self,
        url: &str,
        num_images: usize,
        num_links: usize,
    ) -> Result<LedgerRecord, LedgerError> {
        let mut rows = self.read_rows()?;
        let position = rows
            .iter()
            .position(|row| row.get(0) == Some(url))
            .ok_or_else(|| LedgerError::MissingRecord(url.to_string()))?;

        let record = LedgerRecord::new(url, num_images, num_links);
        rows[position] = record.to_row();

        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer
            .write_record(LEDGER_HEADER)
            .map_err(|e| self.csv_error(e))?;
        for row in &rows {
            writer.write_record(row).map_err(|e| self.csv_error(e))?;
        }
        let content = writer
            .into_inner()
            .map_err(|e| self.io_error(e.into_error()))?;

        write_atomic(&self.path, &content).map_err(|e| self.io_error(e))?;

        Ok(record)
    }

    /// Inserts a record for `url`, or updates it in place when one exists.
    pub fn upsert(
        &self,
        url: &str,
        num_images: usize,
        num_links: usize,
    ) -> Result<UpsertOutcome, LedgerError> {
        match self.lookup(url)? {
            Some(_) => self
                .update(url, num_images, num_links)
                .map(UpsertOutcome::Updated),
            None => {
                let record = LedgerRecord::new(url, num_images, num_links);
                self.insert(&record)?;
                Ok(UpsertOutcome::Inserted(record))
            }
        }
    }

    fn read_rows(&self) -> Result<Vec<StringRecord>, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let headers = reader.headers().map_err(|e| self.csv_error(e))?.clone();

        if headers.is_empty() {
            return Ok(Vec::new());
        }
        if !headers.iter().eq(LEDGER_HEADER) {
            return Err(LedgerError::BadHeader {
                path: self.path.clone(),
                found: headers.iter().map(str::to_string).collect(),
            });
        }

        reader
            .records()
            .map(|row| row.map_err(|e| self.csv_error(e)))
            .collect()
    }

    fn parse_row(
        &self,
        row: &StringRecord,
        header: &StringRecord,
    ) -> Result<LedgerRecord, LedgerError> {
        row.deserialize(Some(header))
            .map_err(|e| self.csv_error(e))
    }

    fn io_error(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> LedgerError {
        LedgerError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

fn header_record() -> StringRecord {
    StringRecord::from(LEDGER_HEADER.to_vec())
}
