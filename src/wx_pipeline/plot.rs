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

use crate::aggregate::HourlyBucket;
use plotters::prelude::*;
use std::error;
use std::fmt;
use std::path::Path;

const WIDTH: u32 = 900;
const HEIGHT: u32 = 420;

#[derive(Debug)]
pub enum PlotError {
    /// Nothing to plot.
    Empty,
    Render(String),
}

impl fmt::Display for PlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "no buckets to plot"),
            Self::Render(e) => write!(f, "render failed: {}", e),
        }
    }
}

impl error::Error for PlotError {}

/// Render the hourly mean-temperature series as a PNG line chart.
///
/// Axes carry no text labels so the bitmap backend needs no font stack;
/// the dashboard presents the image with its own captions.
pub fn render_hourly_trend(buckets: &[HourlyBucket], path: &Path) -> Result<(), PlotError> {
    if buckets.is_empty() {
        return Err(PlotError::Empty);
    }

    let points: Vec<(f64, f64)> = buckets
        .iter()
        .map(|b| (b.hour.timestamp() as f64, b.mean_temp))
        .collect();

    let (mut x_min, mut x_max) = (points[0].0, points[points.len() - 1].0);
    let mut y_min = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let mut y_max = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

    // Pad degenerate ranges so a single bucket still renders.
    if x_min == x_max {
        x_min -= 1800.0;
        x_max += 1800.0;
    }
    if y_min == y_max {
        y_min -= 1.0;
        y_max += 1.0;
    }
    let y_pad = (y_max - y_min) * 0.1;

    let root = BitMapBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| PlotError::Render(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .margin(24)
        .build_cartesian_2d(x_min..x_max, (y_min - y_pad)..(y_max + y_pad))
        .map_err(|e| PlotError::Render(e.to_string()))?;

    chart
        .draw_series(LineSeries::new(points.iter().copied(), &BLUE))
        .map_err(|e| PlotError::Render(e.to_string()))?;
    chart
        .draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 3, BLUE.filled())))
        .map_err(|e| PlotError::Render(e.to_string()))?;

    root.present().map_err(|e| PlotError::Render(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bucket(hour_offset: i64, mean: f64) -> HourlyBucket {
        HourlyBucket {
            hour: Utc.timestamp_opt(1_700_000_000 + hour_offset * 3600, 0).unwrap(),
            mean_temp: mean,
            count: 1,
        }
    }

    #[test]
    fn empty_series_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("trend.png");
        assert!(matches!(render_hourly_trend(&[], &out), Err(PlotError::Empty)));
    }

    #[test]
    fn renders_png_for_multiple_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("trend.png");
        let buckets = vec![bucket(0, 10.0), bucket(1, 12.0), bucket(2, 11.5)];

        render_hourly_trend(&buckets, &out).unwrap();
        let bytes = std::fs::read(&out).unwrap();
        assert!(bytes.starts_with(b"\x89PNG\r\n\x1a\n"));
    }

    #[test]
    fn single_bucket_renders_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("trend.png");
        render_hourly_trend(&[bucket(0, 10.0)], &out).unwrap();
        assert!(out.exists());
    }
}
