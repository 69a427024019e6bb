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
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::error;
use std::fmt;

#[derive(Debug)]
pub enum FetchError {
    /// Connection, DNS, or timeout failure before a response arrived.
    Network(reqwest::Error),
    /// The API answered with a 5xx status.
    Upstream(StatusCode, Url),
    /// The API answered with a 4xx status (bad API key, unknown city).
    Rejected(StatusCode, Url),
    /// The response body could not be decoded.
    Malformed(reqwest::Error),
    /// The configured base URL is not usable.
    InvalidUrl(String),
}

impl FetchError {
    /// Whether the next scheduled tick is expected to succeed without
    /// operator intervention. Permanent errors (auth, unknown city) keep
    /// failing until configuration changes.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected(_, _) | Self::InvalidUrl(_))
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "{}", e),
            Self::Upstream(status, url) => write!(f, "upstream error {} for {}", status, url),
            Self::Rejected(status, url) => write!(f, "request rejected with {} for {}", status, url),
            Self::Malformed(e) => write!(f, "malformed response: {}", e),
            Self::InvalidUrl(u) => write!(f, "invalid API base URL {}", u),
        }
    }
}

impl error::Error for FetchError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Network(e) | Self::Malformed(e) => Some(e),
            _ => None,
        }
    }
}

/// Client for the OpenWeatherMap current-weather API, fixed to one city.
///
/// The `reqwest::Client` is injected by the caller and carries the request
/// timeout; a timed-out call surfaces as `FetchError::Network` and is
/// retried naturally on the next scheduled tick.
#[derive(Debug, Clone)]
pub struct OwmClient {
    client: Client,
    base_url: Url,
    api_key: String,
    city: String,
}

impl OwmClient {
    const USER_AGENT: &'static str = "wx_pipeline weather collector";

    pub fn new(client: Client, base_url: &str, api_key: &str, city: &str) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url).map_err(|_| FetchError::InvalidUrl(base_url.to_owned()))?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::InvalidUrl(base_url.to_string()));
        }

        Ok(OwmClient {
            client,
            base_url,
            api_key: api_key.to_owned(),
            city: city.to_owned(),
        })
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    /// Fetch the current observation and normalize it into a `Reading`.
    ///
    /// The reading's timestamp is the observation time reported by the API
    /// (`dt`), falling back to the ingestion time when absent.
    pub async fn fetch(&self) -> Result<Reading, FetchError> {
        let url = self.base_url.clone();
        tracing::debug!(message = "making current weather request", city = %self.city);

        let res = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, Self::USER_AGENT)
            .query(&[
                ("q", self.city.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await
            .map_err(FetchError::Network)?;

        let status = res.status();
        if status.is_server_error() {
            return Err(FetchError::Upstream(status, url));
        }
        if status.is_client_error() {
            return Err(FetchError::Rejected(status, url));
        }

        let body = res.json::<OwmResponse>().await.map_err(FetchError::Malformed)?;
        Ok(self.normalize(body))
    }

    fn normalize(&self, body: OwmResponse) -> Reading {
        let timestamp = body
            .dt
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        Reading {
            city: self.city.clone(),
            timestamp,
            temperature: body.main.temp,
            humidity: body.main.humidity,
            wind_speed: body.wind.and_then(|w| w.speed),
            pressure: body.main.pressure,
            conditions: body.weather.into_iter().next().and_then(|w| w.description),
        }
    }
}

#[derive(Deserialize, Debug)]
struct OwmResponse {
    #[serde(alias = "main")]
    main: OwmMain,
    #[serde(alias = "wind")]
    wind: Option<OwmWind>,
    #[serde(alias = "weather", default)]
    weather: Vec<OwmCondition>,
    #[serde(alias = "dt")]
    dt: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct OwmMain {
    #[serde(alias = "temp")]
    temp: f64,
    #[serde(alias = "humidity")]
    humidity: Option<f64>,
    #[serde(alias = "pressure")]
    pressure: Option<f64>,
}

#[derive(Deserialize, Debug)]
struct OwmWind {
    #[serde(alias = "speed")]
    speed: Option<f64>,
}

#[derive(Deserialize, Debug)]
struct OwmCondition {
    #[serde(alias = "description")]
    description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str = r#"{
        "weather": [{"id": 500, "main": "Rain", "description": "light rain"}],
        "main": {"temp": 18.4, "pressure": 1012, "humidity": 71},
        "wind": {"speed": 3.6, "deg": 220},
        "dt": 1700000000,
        "name": "Istanbul"
    }"#;

    #[tokio::test]
    async fn fetch_normalizes_observation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "Istanbul"))
            .and(query_param("units", "metric"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(BODY, "application/json"))
            .mount(&server)
            .await;

        let owm = OwmClient::new(Client::new(), &server.uri(), "test-key", "Istanbul").unwrap();
        let reading = owm.fetch().await.unwrap();

        assert_eq!(reading.city, "Istanbul");
        assert_eq!(reading.temperature, 18.4);
        assert_eq!(reading.humidity, Some(71.0));
        assert_eq!(reading.wind_speed, Some(3.6));
        assert_eq!(reading.pressure, Some(1012.0));
        assert_eq!(reading.conditions.as_deref(), Some("light rain"));
        assert_eq!(reading.timestamp.timestamp(), 1700000000);
    }

    #[tokio::test]
    async fn auth_failure_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let owm = OwmClient::new(Client::new(), &server.uri(), "bad-key", "Istanbul").unwrap();
        let err = owm.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Rejected(StatusCode::UNAUTHORIZED, _)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let owm = OwmClient::new(Client::new(), &server.uri(), "test-key", "Istanbul").unwrap();
        let err = owm.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Upstream(StatusCode::SERVICE_UNAVAILABLE, _)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn missing_dt_falls_back_to_ingestion_time() {
        let server = MockServer::start().await;
        let body = r#"{"weather": [], "main": {"temp": 5.0}}"#;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
            .mount(&server)
            .await;

        let owm = OwmClient::new(Client::new(), &server.uri(), "test-key", "Istanbul").unwrap();
        let before = Utc::now();
        let reading = owm.fetch().await.unwrap();
        assert!(reading.timestamp >= before);
        assert_eq!(reading.conditions, None);
        assert_eq!(reading.wind_speed, None);
    }
}
