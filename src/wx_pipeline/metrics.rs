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
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: Outcome,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Ok,
    Rejected,
    Failed,
    NoData,
}

/// Holder for metrics updated by the ingestion and aggregation jobs.
///
/// All metrics are created and registered upon call to `PipelineMetrics::new()`.
/// Metrics share the prefix "wx_".
#[derive(Default)]
pub struct PipelineMetrics {
    ticks: Family<OutcomeLabels, Counter>,
    readings_stored: Counter,
    aggregate_runs: Family<OutcomeLabels, Counter>,
    anomalies_flagged: Counter,
    last_temperature: Gauge<f64, AtomicU64>,
}

impl PipelineMetrics {
    /// Create a new `PipelineMetrics` and register each metric with the
    /// provided `Registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();

        registry.register(
            "wx_ticks",
            "Ingestion ticks by outcome",
            metrics.ticks.clone(),
        );
        registry.register(
            "wx_readings_stored",
            "Readings appended to the store",
            metrics.readings_stored.clone(),
        );
        registry.register(
            "wx_aggregate_runs",
            "Aggregation runs by outcome",
            metrics.aggregate_runs.clone(),
        );
        registry.register(
            "wx_anomalies_flagged",
            "Readings flagged as statistical anomalies",
            metrics.anomalies_flagged.clone(),
        );
        registry.register(
            "wx_last_temperature_celsius",
            "Temperature of the most recently ingested reading",
            metrics.last_temperature.clone(),
        );

        metrics
    }

    pub fn tick(&self, outcome: Outcome) {
        self.ticks.get_or_create(&OutcomeLabels { outcome }).inc();
    }

    pub fn stored(&self, reading: &Reading) {
        self.readings_stored.inc();
        self.last_temperature.set(reading.temperature);
    }

    pub fn aggregate_run(&self, outcome: Outcome) {
        self.aggregate_runs.get_or_create(&OutcomeLabels { outcome }).inc();
    }

    pub fn anomalies(&self, count: usize) {
        self.anomalies_flagged.inc_by(count as u64);
    }
}
