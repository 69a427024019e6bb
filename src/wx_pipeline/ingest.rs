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

use crate::client::OwmClient;
use crate::metrics::{Outcome, PipelineMetrics};
use crate::reading::Reading;
use crate::store::ReadingStore;
use std::sync::Arc;

/// Physically plausible surface temperature range, degrees celsius.
/// Readings outside it are upstream garbage and are dropped.
const MIN_VALID_TEMP: f64 = -90.0;
const MAX_VALID_TEMP: f64 = 60.0;

/// What happened to one scheduled ingestion tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// One reading was fetched, validated, and appended.
    Stored,
    /// The reading was fetched but failed validation and was dropped.
    Rejected(String),
    /// The tick failed; the next scheduled tick is the retry.
    Failed(String),
}

/// One fetch-validate-write pass per scheduler tick.
///
/// Ticks are independent: there is no in-process retry or backoff, and at
/// most one store write happens per tick. Every error is absorbed at this
/// boundary and logged; the job is always ready for the next tick.
#[derive(Clone)]
pub struct IngestJob {
    client: OwmClient,
    store: ReadingStore,
    metrics: Arc<PipelineMetrics>,
}

impl IngestJob {
    pub fn new(client: OwmClient, store: ReadingStore, metrics: Arc<PipelineMetrics>) -> Self {
        IngestJob { client, store, metrics }
    }

    pub async fn tick(&self) -> TickOutcome {
        let reading = match self.client.fetch().await {
            Ok(r) => r,
            Err(e) if e.is_transient() => {
                tracing::warn!(message = "fetch failed, waiting for next tick", error = %e);
                self.metrics.tick(Outcome::Failed);
                return TickOutcome::Failed(e.to_string());
            }
            Err(e) => {
                tracing::error!(message = "fetch rejected by upstream, check configuration", error = %e);
                self.metrics.tick(Outcome::Failed);
                return TickOutcome::Failed(e.to_string());
            }
        };

        if let Err(reason) = validate(&reading) {
            tracing::warn!(
                message = "dropping invalid reading",
                reason = %reason,
                temperature = reading.temperature,
                timestamp = %reading.timestamp,
            );
            self.metrics.tick(Outcome::Rejected);
            return TickOutcome::Rejected(reason);
        }

        match self.store.append(&reading) {
            Ok(()) => {
                tracing::info!(
                    message = "stored reading",
                    city = %reading.city,
                    temperature = reading.temperature,
                    timestamp = %reading.timestamp,
                );
                self.metrics.stored(&reading);
                self.metrics.tick(Outcome::Ok);
                TickOutcome::Stored
            }
            Err(e) => {
                tracing::error!(message = "failed to store reading", error = %e);
                self.metrics.tick(Outcome::Failed);
                TickOutcome::Failed(e.to_string())
            }
        }
    }
}

fn validate(reading: &Reading) -> Result<(), String> {
    let t = reading.temperature;
    if !t.is_finite() {
        return Err(format!("temperature is not a number: {}", t));
    }
    if !(MIN_VALID_TEMP..=MAX_VALID_TEMP).contains(&t) {
        return Err(format!(
            "temperature {} outside plausible range [{}, {}]",
            t, MIN_VALID_TEMP, MAX_VALID_TEMP
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use reqwest::Client;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reading(temp: f64) -> Reading {
        Reading {
            city: "Istanbul".to_owned(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            temperature: temp,
            humidity: None,
            wind_speed: None,
            pressure: None,
            conditions: None,
        }
    }

    #[test]
    fn validation_bounds() {
        assert!(validate(&reading(18.0)).is_ok());
        assert!(validate(&reading(-90.0)).is_ok());
        assert!(validate(&reading(60.0)).is_ok());
        assert!(validate(&reading(150.0)).is_err());
        assert!(validate(&reading(-120.0)).is_err());
        assert!(validate(&reading(f64::NAN)).is_err());
    }

    async fn job_for(server: &MockServer) -> (IngestJob, ReadingStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ReadingStore::open(dir.path()).unwrap();
        let client = OwmClient::new(Client::new(), &server.uri(), "test-key", "Istanbul").unwrap();
        let metrics = Arc::new(PipelineMetrics::default());
        (IngestJob::new(client, store.clone(), metrics), store, dir)
    }

    #[tokio::test]
    async fn successful_tick_stores_exactly_one_reading() {
        let server = MockServer::start().await;
        let body = r#"{"weather": [], "main": {"temp": 18.0}, "dt": 1700000000}"#;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
            .mount(&server)
            .await;

        let (job, store, _dir) = job_for(&server).await;
        assert_eq!(job.tick().await, TickOutcome::Stored);
        assert_eq!(store.len().unwrap(), 1);

        let latest = store.query_latest().unwrap();
        assert_eq!(latest.temperature, 18.0);
        assert_eq!(latest.timestamp.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn out_of_range_reading_is_not_written() {
        let server = MockServer::start().await;
        let body = r#"{"weather": [], "main": {"temp": 150.0}, "dt": 1700000000}"#;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
            .mount(&server)
            .await;

        let (job, store, _dir) = job_for(&server).await;
        assert!(matches!(job.tick().await, TickOutcome::Rejected(_)));
        assert_eq!(store.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn transient_failure_leaves_store_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let (job, store, _dir) = job_for(&server).await;
        assert!(matches!(job.tick().await, TickOutcome::Failed(_)));
        assert_eq!(store.len().unwrap(), 0);
    }
}
