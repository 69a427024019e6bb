// wx_pipeline - weather collection, storage, and aggregation pipeline
//
// Copyright 2025 The wx_pipeline Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::reading::Reading;
use chrono::{DateTime, Utc};
use std::error;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub enum StoreError {
    /// The underlying filesystem failed.
    Unavailable(io::Error),
    /// A stored document could not be decoded.
    InvalidData(serde_json::Error),
    /// The store holds no readings.
    NotFound,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(e) => write!(f, "store unavailable: {}", e),
            Self::InvalidData(e) => write!(f, "invalid stored document: {}", e),
            Self::NotFound => write!(f, "no readings stored"),
        }
    }
}

impl error::Error for StoreError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Unavailable(e) => Some(e),
            Self::InvalidData(e) => Some(e),
            Self::NotFound => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        Self::Unavailable(e)
    }
}

static APPEND_SEQ: AtomicU64 = AtomicU64::new(0);

/// Append-only store of readings: one JSON document per reading under a
/// collection directory, keyed by an auto-generated ID.
///
/// Documents are written to a temp file and renamed into place so readers
/// never observe a partial document. Concurrent appends are safe because
/// every document gets a unique name; duplicate logical readings are not
/// detected or prevented.
#[derive(Debug, Clone)]
pub struct ReadingStore {
    root: PathBuf,
}

impl ReadingStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(ReadingStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Append one reading. Writing the same logical reading twice creates
    /// two documents.
    pub fn append(&self, reading: &Reading) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(reading).map_err(StoreError::InvalidData)?;
        let id = self.next_id(reading.timestamp);

        let tmp = self.root.join(format!("{}.tmp", id));
        let dest = self.root.join(format!("{}.json", id));

        let mut file = fs::OpenOptions::new().write(true).create_new(true).open(&tmp)?;
        file.write_all(&body)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &dest)?;

        tracing::debug!(message = "appended reading", id = %id, timestamp = %reading.timestamp);
        Ok(())
    }

    /// All readings with `start <= timestamp <= end`, sorted ascending.
    ///
    /// An empty range yields an empty vec, never an error. Order of the
    /// underlying documents is irrelevant; the result is always sorted.
    pub fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StoreError> {
        let mut out = Vec::new();
        for reading in self.scan()? {
            let reading = reading?;
            if reading.timestamp >= start && reading.timestamp <= end {
                out.push(reading);
            }
        }
        out.sort_by_key(|r| r.timestamp);
        Ok(out)
    }

    /// The most recent reading by timestamp, or `StoreError::NotFound` when
    /// the store is empty.
    pub fn query_latest(&self) -> Result<Reading, StoreError> {
        let mut latest: Option<Reading> = None;
        for reading in self.scan()? {
            let reading = reading?;
            match &latest {
                Some(cur) if cur.timestamp >= reading.timestamp => {}
                _ => latest = Some(reading),
            }
        }
        latest.ok_or(StoreError::NotFound)
    }

    /// Number of stored documents.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.scan()?.count())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn scan(&self) -> Result<impl Iterator<Item = Result<Reading, StoreError>>, StoreError> {
        let entries = fs::read_dir(&self.root)?;
        Ok(entries.filter_map(|entry| {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => return Some(Err(StoreError::Unavailable(e))),
            };
            let path = entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                return None;
            }
            Some(read_document(&path))
        }))
    }

    fn next_id(&self, timestamp: DateTime<Utc>) -> String {
        let seq = APPEND_SEQ.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", timestamp.timestamp_millis(), process::id(), seq)
    }
}

fn read_document(path: &Path) -> Result<Reading, StoreError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(StoreError::InvalidData)
}
