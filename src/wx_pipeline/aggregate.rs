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

use crate::metrics::{Outcome, PipelineMetrics};
use crate::plot::{self, PlotError};
use crate::reading::Reading;
use crate::sink::{BucketSink, SinkError};
use crate::store::{ReadingStore, StoreError};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error;
use std::fmt;
use std::fs;
use std::process;
use std::sync::Arc;

pub const DEFAULT_WINDOW_DAYS: i64 = 7;
pub const DEFAULT_SIGMA_K: f64 = 2.0;

#[derive(Debug)]
pub enum AggregateError {
    Store(StoreError),
    Plot(PlotError),
    Sink(SinkError),
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "window read failed: {}", e),
            Self::Plot(e) => write!(f, "trend plot failed: {}", e),
            Self::Sink(e) => write!(f, "report upload failed: {}", e),
        }
    }
}

impl error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Plot(e) => Some(e),
            Self::Sink(e) => Some(e),
        }
    }
}

impl From<StoreError> for AggregateError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<PlotError> for AggregateError {
    fn from(e: PlotError) -> Self {
        Self::Plot(e)
    }
}

impl From<SinkError> for AggregateError {
    fn from(e: SinkError) -> Self {
        Self::Sink(e)
    }
}

/// Mean temperature of all readings whose timestamp falls in one hour.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyBucket {
    pub hour: DateTime<Utc>,
    pub mean_temp: f64,
    pub count: usize,
}

/// Min/max/mean temperature per calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub min_temp: f64,
    pub max_temp: f64,
    pub mean_temp: f64,
    pub count: usize,
}

/// Overall summary over one aggregation window. Recomputed on every run and
/// superseded by the next; never merged.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateStats {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub mean_temp: f64,
    pub min_temp: f64,
    pub max_temp: f64,
    pub reading_count: usize,
    pub computed_at: DateTime<Utc>,
}

/// A reading whose temperature is statistically distant from the window mean.
#[derive(Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    /// Distance from the window mean, in standard deviations.
    pub deviation: f64,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        stats: AggregateStats,
        anomalies: Vec<Anomaly>,
        plot_object: String,
    },
    /// The window held no readings. A normal result, not a failure.
    NoData,
    Failed(String),
}

/// Batch job: read a window of readings, resample, compute stats, detect
/// anomalies, and write the report to the sink.
///
/// Runs single-shot on its own schedule, independent of ingestion. Every
/// error in a run is caught here, logged, and ends the run cleanly; the
/// next scheduled invocation is the retry.
pub struct Aggregator {
    store: ReadingStore,
    sink: BucketSink,
    window: Duration,
    sigma_k: f64,
    metrics: Arc<PipelineMetrics>,
}

impl Aggregator {
    pub fn new(
        store: ReadingStore,
        sink: BucketSink,
        window: Duration,
        sigma_k: f64,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Aggregator {
            store,
            sink,
            window,
            sigma_k,
            metrics,
        }
    }

    pub fn run(&self) -> RunOutcome {
        match self.run_inner() {
            Ok(RunOutcome::NoData) => {
                tracing::info!(message = "no readings in window, nothing to aggregate");
                self.metrics.aggregate_run(Outcome::NoData);
                RunOutcome::NoData
            }
            Ok(outcome) => {
                self.metrics.aggregate_run(Outcome::Ok);
                outcome
            }
            Err(e) => {
                tracing::error!(message = "aggregation run failed", error = %e);
                self.metrics.aggregate_run(Outcome::Failed);
                RunOutcome::Failed(e.to_string())
            }
        }
    }

    fn run_inner(&self) -> Result<RunOutcome, AggregateError> {
        let window_end = Utc::now();
        let window_start = window_end - self.window;

        let mut readings = self.store.query_range(window_start, window_end)?;
        if readings.is_empty() {
            return Ok(RunOutcome::NoData);
        }
        // The store sorts, but duplicate and out-of-order writes make that
        // a soft guarantee. Sort again before any time-series computation.
        readings.sort_by_key(|r| r.timestamp);

        let hourly = hourly_means(&readings);
        let daily = daily_summaries(&readings);
        let (mean, min, max) = window_stats(&readings).unwrap_or((0.0, 0.0, 0.0));
        let computed_at = Utc::now();

        let stats = AggregateStats {
            window_start,
            window_end,
            mean_temp: mean,
            min_temp: min,
            max_temp: max,
            reading_count: readings.len(),
            computed_at,
        };

        tracing::info!(
            message = "window statistics",
            readings = readings.len(),
            hourly_buckets = hourly.len(),
            daily_buckets = daily.len(),
            mean_temp = mean,
            min_temp = min,
            max_temp = max,
        );

        let anomalies = detect_anomalies(&readings, self.sigma_k);
        for a in &anomalies {
            tracing::warn!(
                message = "anomalous reading",
                timestamp = %a.timestamp,
                temperature = a.temperature,
                deviation = a.deviation,
            );
        }
        self.metrics.anomalies(anomalies.len());

        let local_plot = std::env::temp_dir().join(format!(
            "wx-trend-{}-{}.png",
            computed_at.timestamp_millis(),
            process::id()
        ));
        plot::render_hourly_trend(&hourly, &local_plot)?;
        let plot_object = self.sink.store_plot(&local_plot, computed_at)?;
        let _ = fs::remove_file(&local_plot);

        self.sink.store_stats(&stats)?;

        tracing::info!(
            message = "aggregation run complete",
            plot_object = %plot_object,
            anomalies = anomalies.len(),
        );

        Ok(RunOutcome::Completed {
            stats,
            anomalies,
            plot_object,
        })
    }
}

fn hour_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(3600);
    Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
}

/// Resample readings into hourly buckets, taking the mean temperature of
/// each bucket. Hours with no readings are omitted, not interpolated.
pub fn hourly_means(readings: &[Reading]) -> Vec<HourlyBucket> {
    let mut buckets: BTreeMap<DateTime<Utc>, Vec<f64>> = BTreeMap::new();
    for r in readings {
        buckets.entry(hour_floor(r.timestamp)).or_default().push(r.temperature);
    }

    buckets
        .into_iter()
        .map(|(hour, temps)| HourlyBucket {
            hour,
            mean_temp: temps.iter().sum::<f64>() / temps.len() as f64,
            count: temps.len(),
        })
        .collect()
}

/// Resample readings into calendar-day buckets with min/max/mean. Days with
/// no readings are omitted.
pub fn daily_summaries(readings: &[Reading]) -> Vec<DailySummary> {
    let mut buckets: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for r in readings {
        buckets.entry(r.timestamp.date_naive()).or_default().push(r.temperature);
    }

    buckets
        .into_iter()
        .map(|(date, temps)| {
            let min = temps.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = temps.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let mean = temps.iter().sum::<f64>() / temps.len() as f64;
            DailySummary {
                date,
                min_temp: min,
                max_temp: max,
                mean_temp: mean,
                count: temps.len(),
            }
        })
        .collect()
}

/// Overall (mean, min, max) temperature across the window, or `None` for an
/// empty slice.
pub fn window_stats(readings: &[Reading]) -> Option<(f64, f64, f64)> {
    if readings.is_empty() {
        return None;
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for r in readings {
        min = min.min(r.temperature);
        max = max.max(r.temperature);
        sum += r.temperature;
    }
    Some((sum / readings.len() as f64, min, max))
}

/// Flag readings whose temperature is at least `k` population standard
/// deviations from the window mean.
///
/// A constant series (sigma = 0) or fewer than 2 readings yields no
/// anomalies; there is nothing to measure distance against.
pub fn detect_anomalies(readings: &[Reading], k: f64) -> Vec<Anomaly> {
    if readings.len() < 2 {
        return Vec::new();
    }

    let n = readings.len() as f64;
    let mean = readings.iter().map(|r| r.temperature).sum::<f64>() / n;
    let variance = readings
        .iter()
        .map(|r| (r.temperature - mean).powi(2))
        .sum::<f64>()
        / n;
    let sigma = variance.sqrt();
    if sigma == 0.0 {
        return Vec::new();
    }

    readings
        .iter()
        .filter(|r| (r.temperature - mean).abs() >= k * sigma)
        .map(|r| Anomaly {
            timestamp: r.timestamp,
            temperature: r.temperature,
            deviation: (r.temperature - mean).abs() / sigma,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading(secs: i64, temp: f64) -> Reading {
        Reading {
            city: "Istanbul".to_owned(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            temperature: temp,
            humidity: None,
            wind_speed: None,
            pressure: None,
            conditions: None,
        }
    }

    fn series(temps: &[f64]) -> Vec<Reading> {
        temps
            .iter()
            .enumerate()
            .map(|(i, &t)| reading(i as i64 * 3600, t))
            .collect()
    }

    #[test]
    fn constant_series_has_no_anomalies() {
        let readings = series(&[10.0, 10.0, 10.0, 10.0]);
        assert!(detect_anomalies(&readings, 2.0).is_empty());
        assert!(detect_anomalies(&readings, 0.1).is_empty());
    }

    #[test]
    fn single_reading_has_no_anomalies() {
        let readings = series(&[42.0]);
        assert!(detect_anomalies(&readings, 2.0).is_empty());
    }

    #[test]
    fn outlier_is_flagged_at_two_sigma() {
        let readings = series(&[10.0, 10.0, 10.0, 10.0, 50.0]);
        let anomalies = detect_anomalies(&readings, 2.0);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].temperature, 50.0);
        assert!((anomalies[0].deviation - 2.0).abs() < 1e-9);
    }

    #[test]
    fn hourly_resample_means_within_hour() {
        // 10:05 at 20C and 10:50 at 24C fall in the same bucket.
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 10, 5, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 3, 1, 10, 50, 0).unwrap();
        let readings = vec![
            Reading { timestamp: t0, ..reading(0, 20.0) },
            Reading { timestamp: t1, ..reading(0, 24.0) },
        ];

        let buckets = hourly_means(&readings);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].hour, Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(buckets[0].mean_temp, 22.0);
        assert_eq!(buckets[0].count, 2);
    }

    #[test]
    fn hours_without_readings_are_omitted() {
        // Readings at 00:00 and 05:00; the gap produces no buckets.
        let readings = vec![reading(0, 1.0), reading(5 * 3600, 2.0)];
        let buckets = hourly_means(&readings);
        assert_eq!(buckets.len(), 2);
    }

    #[test]
    fn daily_summary_min_max_mean() {
        let d0 = Utc.with_ymd_and_hms(2025, 3, 1, 6, 0, 0).unwrap();
        let d1 = Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap();
        let d2 = Utc.with_ymd_and_hms(2025, 3, 2, 6, 0, 0).unwrap();
        let readings = vec![
            Reading { timestamp: d0, ..reading(0, 4.0) },
            Reading { timestamp: d1, ..reading(0, 12.0) },
            Reading { timestamp: d2, ..reading(0, 7.0) },
        ];

        let days = daily_summaries(&readings);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(days[0].min_temp, 4.0);
        assert_eq!(days[0].max_temp, 12.0);
        assert_eq!(days[0].mean_temp, 8.0);
        assert_eq!(days[1].count, 1);
    }

    #[test]
    fn window_stats_reduce() {
        let readings = series(&[3.0, 9.0, 6.0]);
        let (mean, min, max) = window_stats(&readings).unwrap();
        assert_eq!(mean, 6.0);
        assert_eq!(min, 3.0);
        assert_eq!(max, 9.0);
        assert!(window_stats(&[]).is_none());
    }

    #[test]
    fn unsorted_input_resamples_identically() {
        let mut readings = series(&[1.0, 2.0, 3.0, 4.0]);
        let sorted = hourly_means(&readings);
        readings.reverse();
        assert_eq!(hourly_means(&readings), sorted);
    }

    #[test]
    fn empty_window_run_is_no_data() {
        let store_dir = tempfile::tempdir().unwrap();
        let bucket_dir = tempfile::tempdir().unwrap();
        let store = ReadingStore::open(store_dir.path()).unwrap();
        let sink = BucketSink::open(bucket_dir.path()).unwrap();
        let agg = Aggregator::new(
            store,
            sink,
            Duration::days(DEFAULT_WINDOW_DAYS),
            DEFAULT_SIGMA_K,
            Arc::new(PipelineMetrics::default()),
        );

        assert!(matches!(agg.run(), RunOutcome::NoData));
    }

    #[test]
    fn full_run_writes_plot_and_stats() {
        let store_dir = tempfile::tempdir().unwrap();
        let bucket_dir = tempfile::tempdir().unwrap();
        let store = ReadingStore::open(store_dir.path()).unwrap();
        let sink = BucketSink::open(bucket_dir.path()).unwrap();

        let now = Utc::now();
        for i in 0..12 {
            let r = Reading {
                timestamp: now - Duration::hours(i),
                ..reading(0, 10.0 + i as f64)
            };
            store.append(&r).unwrap();
        }

        let agg = Aggregator::new(
            store,
            sink.clone(),
            Duration::days(DEFAULT_WINDOW_DAYS),
            DEFAULT_SIGMA_K,
            Arc::new(PipelineMetrics::default()),
        );

        match agg.run() {
            RunOutcome::Completed { stats, plot_object, .. } => {
                assert_eq!(stats.reading_count, 12);
                assert_eq!(stats.min_temp, 10.0);
                assert_eq!(stats.max_temp, 21.0);
                let (name, _) = sink.latest_plot().unwrap().unwrap();
                assert_eq!(name, plot_object);
            }
            other => panic!("expected completed run, got {:?}", other),
        }
    }
}
