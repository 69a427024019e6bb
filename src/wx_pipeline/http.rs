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

use crate::ingest::{IngestJob, TickOutcome};
use crate::reading::Reading;
use crate::sink::BucketSink;
use crate::store::{ReadingStore, StoreError};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use prometheus_client::registry::Registry;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const HISTORY_LIMIT: usize = 100;
const AVERAGE_WINDOW_HOURS: i64 = 24;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Shared state for all dashboard and trigger handlers. Dependencies are
/// injected here so tests can point handlers at throwaway directories.
pub struct AppState {
    pub store: ReadingStore,
    pub sink: BucketSink,
    pub ingest: IngestJob,
    pub registry: Registry,
    pub history_window: Duration,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/current", get(current))
        .route("/history", get(history))
        .route("/average-temperature", get(average_temperature))
        .route("/temperature-trend", get(temperature_trend))
        .route("/plots/:name", get(plot_object))
        .route("/ingest", post(trigger_ingest))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Firestore-style timestamp encoding kept for dashboard compatibility.
#[derive(Serialize, Debug, PartialEq)]
pub struct TimestampJson {
    #[serde(rename = "_seconds")]
    pub seconds: i64,
}

#[derive(Serialize, Debug)]
pub struct ReadingJson {
    pub city: String,
    pub timestamp: TimestampJson,
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub pressure: Option<f64>,
    pub conditions: Option<String>,
}

impl From<Reading> for ReadingJson {
    fn from(r: Reading) -> Self {
        ReadingJson {
            city: r.city,
            timestamp: TimestampJson {
                seconds: r.timestamp.timestamp(),
            },
            temperature: r.temperature,
            humidity: r.humidity,
            wind_speed: r.wind_speed,
            pressure: r.pressure,
            conditions: r.conditions,
        }
    }
}

/// The latest stored reading, independent of the HTTP plumbing.
pub fn current_payload(store: &ReadingStore) -> Result<ReadingJson, StoreError> {
    store.query_latest().map(ReadingJson::from)
}

/// Chronological readings from the recent window, capped at the most
/// recent `HISTORY_LIMIT`.
pub fn history_payload(
    store: &ReadingStore,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<ReadingJson>, StoreError> {
    let mut readings = store.query_range(now - window, now)?;
    if readings.len() > HISTORY_LIMIT {
        readings.drain(..readings.len() - HISTORY_LIMIT);
    }
    Ok(readings.into_iter().map(ReadingJson::from).collect())
}

/// Mean temperature over the trailing 24 hours, rounded to 2 decimals.
/// `None` when the window holds no readings.
pub fn average_payload(
    store: &ReadingStore,
    now: DateTime<Utc>,
) -> Result<Option<f64>, StoreError> {
    let readings = store.query_range(now - Duration::hours(AVERAGE_WINDOW_HOURS), now)?;
    if readings.is_empty() {
        return Ok(None);
    }
    let mean = readings.iter().map(|r| r.temperature).sum::<f64>() / readings.len() as f64;
    Ok(Some((mean * 100.0).round() / 100.0))
}

fn no_data() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "no data found"}))).into_response()
}

fn store_failure(e: StoreError) -> Response {
    tracing::error!(message = "store read failed", error = %e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "store unavailable"})),
    )
        .into_response()
}

async fn current(State(state): State<Arc<AppState>>) -> Response {
    match current_payload(&state.store) {
        Ok(reading) => Json(reading).into_response(),
        Err(StoreError::NotFound) => no_data(),
        Err(e) => store_failure(e),
    }
}

async fn history(State(state): State<Arc<AppState>>) -> Response {
    match history_payload(&state.store, state.history_window, Utc::now()) {
        Ok(readings) => Json(readings).into_response(),
        Err(e) => store_failure(e),
    }
}

async fn average_temperature(State(state): State<Arc<AppState>>) -> Response {
    match average_payload(&state.store, Utc::now()) {
        Ok(Some(avg)) => Json(json!({"average_temperature": avg})).into_response(),
        Ok(None) => no_data(),
        Err(e) => store_failure(e),
    }
}

async fn temperature_trend(State(state): State<Arc<AppState>>) -> Response {
    match state.sink.latest_plot() {
        Ok(Some((name, uploaded_at))) => Json(json!({
            "image_url": format!("/plots/{}", name),
            "timestamp": TimestampJson { seconds: uploaded_at.timestamp() },
        }))
        .into_response(),
        Ok(None) => no_data(),
        Err(e) => {
            tracing::error!(message = "failed to list plots", error = %e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "report sink unavailable"})),
            )
                .into_response()
        }
    }
}

async fn plot_object(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    match state.sink.read_plot(&name) {
        Ok(Some(bytes)) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(message = "failed to read plot", object = %name, error = %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Ingestion trigger, invoked by the external scheduler. No body required;
/// the response reports only whether this tick produced a stored reading.
async fn trigger_ingest(State(state): State<Arc<AppState>>) -> Response {
    match state.ingest.tick().await {
        TickOutcome::Stored => Json(json!({"status": "stored"})).into_response(),
        TickOutcome::Rejected(reason) => {
            Json(json!({"status": "rejected", "reason": reason})).into_response()
        }
        TickOutcome::Failed(reason) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": reason})),
        )
            .into_response(),
    }
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let mut buf = String::new();
    match prometheus_client::encoding::text::encode(&mut buf, &state.registry) {
        Ok(()) => ([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], buf).into_response(),
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
