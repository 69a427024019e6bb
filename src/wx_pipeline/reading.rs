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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One weather observation for a single city.
///
/// `timestamp` is the source of truth for ordering. Readings may arrive
/// duplicated or out of order; consumers sort by `timestamp` before any
/// time-series computation. A reading is immutable once stored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reading {
    pub city: String,
    pub timestamp: DateTime<Utc>,
    /// Temperature in degrees celsius.
    pub temperature: f64,
    /// Relative humidity (0-100).
    #[serde(default)]
    pub humidity: Option<f64>,
    /// Wind speed in meters per second.
    #[serde(default)]
    pub wind_speed: Option<f64>,
    /// Pressure in hPa.
    #[serde(default)]
    pub pressure: Option<f64>,
    /// Short human-readable description ("light rain").
    #[serde(default)]
    pub conditions: Option<String>,
}
