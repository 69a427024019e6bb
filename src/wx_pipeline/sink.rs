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

use crate::aggregate::AggregateStats;
use chrono::{DateTime, Utc};
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const PLOTS_PREFIX: &str = "plots";
const ANALYTICS_PREFIX: &str = "analytics";

#[derive(Debug)]
pub enum SinkError {
    Upload(io::Error),
    Encode(serde_json::Error),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload(e) => write!(f, "upload failed: {}", e),
            Self::Encode(e) => write!(f, "failed to encode report: {}", e),
        }
    }
}

impl error::Error for SinkError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Upload(e) => Some(e),
            Self::Encode(e) => Some(e),
        }
    }
}

impl From<io::Error> for SinkError {
    fn from(e: io::Error) -> Self {
        Self::Upload(e)
    }
}

/// Report destination: a bucket directory holding timestamped trend plots
/// under `plots/` and aggregate stats records under `analytics/`.
///
/// Objects are write-once; each aggregation run adds a new pair and the
/// dashboard serves whichever plot is newest.
#[derive(Debug, Clone)]
pub struct BucketSink {
    root: PathBuf,
}

impl BucketSink {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let root = root.into();
        fs::create_dir_all(root.join(PLOTS_PREFIX))?;
        fs::create_dir_all(root.join(ANALYTICS_PREFIX))?;
        Ok(BucketSink { root })
    }

    /// Upload a rendered plot, returning the object name.
    pub fn store_plot(&self, local: &Path, computed_at: DateTime<Utc>) -> Result<String, SinkError> {
        let name = format!("trend-{}.png", computed_at.format("%Y%m%dT%H%M%S%3fZ"));
        let dest = self.root.join(PLOTS_PREFIX).join(&name);
        fs::copy(local, &dest)?;
        tracing::debug!(message = "uploaded trend plot", object = %name);
        Ok(name)
    }

    /// Write the aggregate stats record for one run.
    pub fn store_stats(&self, stats: &AggregateStats) -> Result<String, SinkError> {
        let name = format!("stats-{}.json", stats.computed_at.format("%Y%m%dT%H%M%S%3fZ"));
        let body = serde_json::to_vec_pretty(stats).map_err(SinkError::Encode)?;
        fs::write(self.root.join(ANALYTICS_PREFIX).join(&name), body)?;
        tracing::debug!(message = "wrote stats record", object = %name);
        Ok(name)
    }

    /// The newest plot object and its upload time, or `None` when no run
    /// has produced a plot yet.
    pub fn latest_plot(&self) -> Result<Option<(String, DateTime<Utc>)>, SinkError> {
        let mut newest: Option<(String, DateTime<Utc>)> = None;
        for entry in fs::read_dir(self.root.join(PLOTS_PREFIX))? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e != "png").unwrap_or(true) {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_owned(),
                None => continue,
            };
            let modified: DateTime<Utc> = entry.metadata()?.modified()?.into();
            match &newest {
                Some((_, at)) if *at >= modified => {}
                _ => newest = Some((name, modified)),
            }
        }
        Ok(newest)
    }

    /// Read raw plot bytes by object name. `None` when the object does not
    /// exist or the name tries to escape the plots prefix.
    pub fn read_plot(&self, name: &str) -> Result<Option<Vec<u8>>, SinkError> {
        if name.contains('/') || name.contains("..") {
            return Ok(None);
        }
        match fs::read(self.root.join(PLOTS_PREFIX).join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SinkError::Upload(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stats(computed_at: DateTime<Utc>) -> AggregateStats {
        AggregateStats {
            window_start: computed_at - chrono::Duration::days(7),
            window_end: computed_at,
            mean_temp: 11.0,
            min_temp: 4.0,
            max_temp: 19.0,
            reading_count: 42,
            computed_at,
        }
    }

    #[test]
    fn empty_bucket_has_no_latest_plot() {
        let dir = tempfile::tempdir().unwrap();
        let sink = BucketSink::open(dir.path()).unwrap();
        assert!(sink.latest_plot().unwrap().is_none());
    }

    #[test]
    fn store_and_read_back_plot() {
        let dir = tempfile::tempdir().unwrap();
        let sink = BucketSink::open(dir.path()).unwrap();

        let local = dir.path().join("local.png");
        fs::write(&local, b"not-really-a-png").unwrap();

        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let name = sink.store_plot(&local, at).unwrap();

        let (latest, _) = sink.latest_plot().unwrap().unwrap();
        assert_eq!(latest, name);
        assert_eq!(sink.read_plot(&name).unwrap().unwrap(), b"not-really-a-png");
    }

    #[test]
    fn read_plot_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let sink = BucketSink::open(dir.path()).unwrap();
        assert!(sink.read_plot("../analytics/stats.json").unwrap().is_none());
        assert!(sink.read_plot("missing.png").unwrap().is_none());
    }

    #[test]
    fn stats_record_is_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let sink = BucketSink::open(dir.path()).unwrap();

        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let name = sink.store_stats(&stats(at)).unwrap();

        let bytes = fs::read(dir.path().join(ANALYTICS_PREFIX).join(name)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["reading_count"], 42);
        assert_eq!(value["mean_temp"], 11.0);
    }
}
