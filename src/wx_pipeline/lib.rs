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

//! Weather collection, storage, and aggregation pipeline for a single city.
//!
//! ## Features
//!
//! `wx_pipeline` periodically ingests one weather observation from the
//! OpenWeatherMap current-weather API, stores it as an immutable document,
//! and serves a small dashboard API over the stored series. A separately
//! scheduled batch job reads back a window of readings, resamples them to
//! hourly and daily buckets, computes overall statistics, flags statistical
//! anomalies, and writes a trend plot plus a stats record to a report
//! bucket.
//!
//! Ingestion and aggregation are independent single-shot invocations driven
//! by external schedulers. Each tick or run fails atomically: errors are
//! logged at the job boundary and the next scheduled invocation is the
//! retry. Duplicate or out-of-order readings are tolerated throughout and
//! consumers sort by timestamp before computing.
//!
//! ## Usage
//!
//! Serve the dashboard API and the ingestion trigger endpoint:
//!
//! ```text
//! wx-pipeline --city Istanbul --api-key $OWM_API_KEY \
//!     --data-dir /var/lib/wx/readings --bucket-dir /var/lib/wx/bucket serve
//! ```
//!
//! Point a time-based scheduler (hourly in the reference deployment) at
//! `POST /ingest`. The dashboard consumes `GET /current`, `GET /history`,
//! `GET /average-temperature`, and `GET /temperature-trend`; Prometheus
//! metrics are exposed at `GET /metrics`.
//!
//! Run one aggregation pass from cron (daily in the reference deployment):
//!
//! ```text
//! wx-pipeline --city Istanbul --api-key $OWM_API_KEY \
//!     --data-dir /var/lib/wx/readings --bucket-dir /var/lib/wx/bucket \
//!     aggregate --window-days 7 --anomaly-sigma 2.0
//! ```

pub mod aggregate;
pub mod client;
pub mod http;
pub mod ingest;
pub mod metrics;
pub mod plot;
pub mod reading;
pub mod sink;
pub mod store;
