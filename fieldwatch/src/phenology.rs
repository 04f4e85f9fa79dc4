//! Growing-season segmentation of vegetation index series.
//!
//! The detector smooths the series, then runs a two-state machine over it in
//! a single forward pass:
//!
//! - `OutOfSeason -> InSeason` when the smoothed value crosses upward through
//!   the threshold.
//! - `InSeason -> OutOfSeason` when it crosses back down, or when a sharp drop
//!   (harvest) is seen relative to the maximum of a short trailing window.
//!
//! Candidate seasons shorter than the minimum duration are dropped as noise.

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use shared::TimeseriesPoint;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_SMOOTHING_WINDOW: usize = 5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhenologyError {
    #[error("smoothing window must be odd and non-zero, got {0}")]
    InvalidWindow(usize),
    #[error("{dates} dates but {values} values")]
    LengthMismatch { dates: usize, values: usize },
}

/// Detector tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhenologyConfig {
    /// Index value whose crossing starts and ends a season.
    pub threshold: f64,
    /// Decline from the trailing maximum that signals harvest.
    pub sharp_drop: f64,
    /// Span of the trailing window used for the harvest check.
    pub sharp_drop_days: i64,
    /// Seasons shorter than this are discarded.
    pub min_duration_days: i64,
    /// Close a season still open at the end of the series.
    pub close_unclosed: bool,
    /// Centered moving-average width. Must be odd.
    pub smoothing_window: usize,
}

impl Default for PhenologyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.25,
            sharp_drop: 0.20,
            sharp_drop_days: 14,
            min_duration_days: 30,
            close_unclosed: true,
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonHealth {
    Excellent,
    Good,
    Moderate,
    Poor,
}

impl SeasonHealth {
    pub const ALL: [SeasonHealth; 4] = [
        SeasonHealth::Excellent,
        SeasonHealth::Good,
        SeasonHealth::Moderate,
        SeasonHealth::Poor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SeasonHealth::Excellent => "excellent",
            SeasonHealth::Good => "good",
            SeasonHealth::Moderate => "moderate",
            SeasonHealth::Poor => "poor",
        }
    }
}

impl fmt::Display for SeasonHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health rating from peak index value and season length. First match wins.
pub fn classify_health(peak: f64, duration_days: i64) -> SeasonHealth {
    if peak > 0.7 && duration_days > 150 {
        SeasonHealth::Excellent
    } else if peak > 0.6 && duration_days > 120 {
        SeasonHealth::Good
    } else if peak > 0.4 && duration_days > 90 {
        SeasonHealth::Moderate
    } else {
        SeasonHealth::Poor
    }
}

/// One detected growing season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub start_date: NaiveDate,
    pub peak_date: NaiveDate,
    /// Smoothed value at the peak.
    pub peak_value: f64,
    pub end_date: NaiveDate,
    pub duration_days: i64,
    pub health: SeasonHealth,
}

fn check_window(window: usize) -> Result<(), PhenologyError> {
    if window == 0 || window % 2 == 0 {
        return Err(PhenologyError::InvalidWindow(window));
    }
    Ok(())
}

/// Fill NaN gaps by linear interpolation on sample index.
///
/// Leading and trailing gaps take the nearest valid value. A series with no
/// valid value is returned unchanged.
fn fill_missing(values: &[f64]) -> Vec<f64> {
    let valid: Vec<usize> = (0..values.len()).filter(|&i| !values[i].is_nan()).collect();
    let (Some(&first), Some(&last)) = (valid.first(), valid.last()) else {
        return values.to_vec();
    };

    let mut filled = values.to_vec();
    for pair in valid.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let span = (b - a) as f64;
        for i in a + 1..b {
            let t = (i - a) as f64 / span;
            filled[i] = values[a] + (values[b] - values[a]) * t;
        }
    }
    filled[..first].fill(values[first]);
    filled[last + 1..].fill(values[last]);
    filled
}

/// Gap-fill and smooth a series with a centered moving average.
///
/// Edges are padded with the boundary value so the output has the input's
/// length. Series shorter than `window` are only gap-filled.
pub fn smooth(values: &[f64], window: usize) -> Result<Vec<f64>, PhenologyError> {
    check_window(window)?;
    let filled = fill_missing(values);
    if filled.len() < window {
        return Ok(filled);
    }

    let half = window / 2;
    let n = filled.len();
    let padded = |i: usize| filled[i.saturating_sub(half).min(n - 1)];
    let smoothed = (0..n)
        .map(|center| (center..center + window).map(padded).sum::<f64>() / window as f64)
        .collect();
    Ok(smoothed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeasonState {
    OutOfSeason,
    InSeason { start: usize },
}

struct Segmenter<'a> {
    dates: &'a [NaiveDate],
    smoothed: &'a [f64],
    config: &'a PhenologyConfig,
}

impl Segmenter<'_> {
    /// Whether sample `i` is a harvest-like drop within a season begun at `start`.
    fn sharp_drop(&self, start: usize, i: usize) -> bool {
        if i < 2 {
            return false;
        }
        // Grow the trailing window until it spans more than sharp_drop_days
        let mut lookback = 1;
        while lookback < i - start {
            let span: i64 = (0..lookback)
                .map(|j| (self.dates[i - j] - self.dates[i - j - 1]).num_days())
                .sum();
            if span > self.config.sharp_drop_days {
                break;
            }
            lookback += 1;
        }
        let recent_max = self.smoothed[i - lookback..i]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        recent_max - self.smoothed[i] >= self.config.sharp_drop
    }

    fn season(&self, start: usize, end: usize) -> Option<Season> {
        let duration_days = (self.dates[end] - self.dates[start]).num_days();
        if duration_days < self.config.min_duration_days {
            debug!(
                "Discarding {}-day season starting {} (minimum {} days)",
                duration_days, self.dates[start], self.config.min_duration_days
            );
            return None;
        }

        let (peak_offset, peak_value) = self.smoothed[start..=end].iter().enumerate().fold(
            (0, f64::NEG_INFINITY),
            |best, (k, &v)| if v > best.1 { (k, v) } else { best },
        );
        Some(Season {
            start_date: self.dates[start],
            peak_date: self.dates[start + peak_offset],
            peak_value,
            end_date: self.dates[end],
            duration_days,
            health: classify_health(peak_value, duration_days),
        })
    }

    fn run(&self) -> Vec<Season> {
        let threshold = self.config.threshold;
        let mut seasons = Vec::new();
        let mut state = SeasonState::OutOfSeason;

        for i in 1..self.smoothed.len() {
            let value = self.smoothed[i];
            state = match state {
                SeasonState::OutOfSeason => {
                    if value >= threshold && self.smoothed[i - 1] < threshold {
                        SeasonState::InSeason { start: i }
                    } else {
                        SeasonState::OutOfSeason
                    }
                }
                SeasonState::InSeason { start } => {
                    if value < threshold || self.sharp_drop(start, i) {
                        seasons.extend(self.season(start, i));
                        SeasonState::OutOfSeason
                    } else {
                        state
                    }
                }
            };
        }

        if let SeasonState::InSeason { start } = state {
            if self.config.close_unclosed {
                seasons.extend(self.season(start, self.smoothed.len() - 1));
            }
        }
        seasons
    }
}

/// Segment a chronologically ordered series into growing seasons.
///
/// Series with fewer samples than the smoothing window have no seasons yet
/// and return an empty list.
pub fn detect_seasons(
    dates: &[NaiveDate],
    values: &[f64],
    config: &PhenologyConfig,
) -> Result<Vec<Season>, PhenologyError> {
    if dates.len() != values.len() {
        return Err(PhenologyError::LengthMismatch {
            dates: dates.len(),
            values: values.len(),
        });
    }
    check_window(config.smoothing_window)?;
    if values.len() < config.smoothing_window {
        debug!(
            "{} samples is shorter than the smoothing window, no seasons",
            values.len()
        );
        return Ok(Vec::new());
    }

    let smoothed = smooth(values, config.smoothing_window)?;
    let seasons = Segmenter {
        dates,
        smoothed: &smoothed,
        config,
    }
    .run();
    debug!("Detected {} seasons in {} samples", seasons.len(), values.len());
    Ok(seasons)
}

/// [`detect_seasons`] over extracted timeseries points.
pub fn detect_seasons_from_points(
    points: &[TimeseriesPoint],
    config: &PhenologyConfig,
) -> Result<Vec<Season>, PhenologyError> {
    let (dates, values) = shared::timeseries::unzip_points(points);
    detect_seasons(&dates, &values, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_helpers::{bell_curve, double_season, spaced_dates};

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn every_five_days(count: usize) -> Vec<NaiveDate> {
        spaced_dates(ymd(2024, 1, 1), count, 5)
    }

    /// Flat, ramp up to 0.8, plateau, then an abrupt fall to 0.3.
    fn harvest_series() -> Vec<f64> {
        let mut values = vec![0.1; 10];
        values.extend((1..=8).map(|k| 0.1 + 0.7 * k as f64 / 8.0));
        values.extend([0.8; 12]);
        values.extend([0.3; 10]);
        values
    }

    #[test]
    fn test_classify_health() {
        assert_eq!(classify_health(0.75, 160), SeasonHealth::Excellent);
        assert_eq!(classify_health(0.65, 130), SeasonHealth::Good);
        assert_eq!(classify_health(0.5, 100), SeasonHealth::Moderate);
        assert_eq!(classify_health(0.3, 50), SeasonHealth::Poor);
        // Thresholds are strict
        assert_eq!(classify_health(0.75, 150), SeasonHealth::Good);
        assert_eq!(classify_health(0.9, 90), SeasonHealth::Poor);
    }

    #[test]
    fn test_smooth_interpolates_missing() {
        let smoothed = smooth(&[1.0, f64::NAN, 3.0, f64::NAN], 5).unwrap();
        assert_eq!(smoothed, vec![1.0, 2.0, 3.0, 3.0]);

        let smoothed = smooth(&[f64::NAN, 2.0, f64::NAN, 4.0, f64::NAN], 3).unwrap();
        assert_relative_eq!(smoothed[0], 2.0);
        assert_relative_eq!(smoothed[1], 7.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(smoothed[2], 3.0);
        assert_relative_eq!(smoothed[4], 4.0);
    }

    #[test]
    fn test_smooth_edges_and_length() {
        let smoothed = smooth(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0], 3).unwrap();
        assert_eq!(smoothed.len(), 7);
        assert_relative_eq!(smoothed[0], 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(smoothed[3], 4.0);
        assert_relative_eq!(smoothed[6], 20.0 / 3.0, epsilon = 1e-12);

        let spike = smooth(&[0.0, 0.0, 0.0, 10.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(spike, vec![0.0, 2.0, 2.0, 2.0, 2.0, 2.0, 0.0]);
    }

    #[test]
    fn test_smooth_all_missing_unchanged() {
        let smoothed = smooth(&[f64::NAN; 6], 5).unwrap();
        assert_eq!(smoothed.len(), 6);
        assert!(smoothed.iter().all(|v| v.is_nan()));
        assert!(smooth(&[], 5).unwrap().is_empty());
    }

    #[test]
    fn test_smooth_rejects_even_window() {
        assert_eq!(smooth(&[1.0; 10], 4), Err(PhenologyError::InvalidWindow(4)));
        assert_eq!(smooth(&[1.0; 10], 0), Err(PhenologyError::InvalidWindow(0)));
    }

    #[test]
    fn test_single_bell_season() {
        let dates = every_five_days(70);
        let values = bell_curve(70, 0.1, 0.8, 35.0, 10.0);
        let seasons = detect_seasons(&dates, &values, &PhenologyConfig::default()).unwrap();

        assert_eq!(seasons.len(), 1);
        let season = &seasons[0];
        assert!(season.peak_value > 0.7 && season.peak_value < 0.9);
        assert!(season.duration_days > 50);
        assert_eq!(season.start_date, ymd(2024, 3, 31));
        assert_eq!(season.peak_date, ymd(2024, 6, 24));
        assert_eq!(season.end_date, ymd(2024, 9, 22));
        assert_eq!(season.duration_days, 175);
        assert_eq!(season.health, SeasonHealth::Excellent);
    }

    #[test]
    fn test_sharp_drop_ends_season() {
        let values = harvest_series();
        let dates = every_five_days(values.len());
        let seasons = detect_seasons(&dates, &values, &PhenologyConfig::default()).unwrap();

        // The series never falls below the threshold, only the drop can end it
        assert_eq!(seasons.len(), 1);
        assert_eq!(seasons[0].start_date, ymd(2024, 2, 25));
        assert_eq!(seasons[0].end_date, ymd(2024, 5, 25));
        assert_eq!(seasons[0].duration_days, 90);
        assert_relative_eq!(seasons[0].peak_value, 0.8, epsilon = 1e-12);

        let lenient = PhenologyConfig {
            sharp_drop: 0.9,
            ..PhenologyConfig::default()
        };
        let seasons = detect_seasons(&dates, &values, &lenient).unwrap();
        assert_eq!(seasons.len(), 1);
        assert_eq!(seasons[0].end_date, *dates.last().unwrap());
        assert_eq!(seasons[0].duration_days, 140);
    }

    #[test]
    fn test_unclosed_season() {
        let mut values = vec![0.1; 10];
        values.extend((1..=8).map(|k| 0.1 + 0.7 * k as f64 / 8.0));
        values.extend([0.8; 20]);
        let dates = every_five_days(values.len());

        let seasons = detect_seasons(&dates, &values, &PhenologyConfig::default()).unwrap();
        assert_eq!(seasons.len(), 1);
        assert_eq!(seasons[0].duration_days, 130);

        let keep_open = PhenologyConfig {
            close_unclosed: false,
            ..PhenologyConfig::default()
        };
        assert!(detect_seasons(&dates, &values, &keep_open).unwrap().is_empty());
    }

    #[test]
    fn test_short_blip_is_discarded() {
        let mut values = vec![0.1; 10];
        values.extend([0.6; 3]);
        values.extend([0.1; 10]);
        let dates = every_five_days(values.len());
        let seasons = detect_seasons(&dates, &values, &PhenologyConfig::default()).unwrap();
        assert!(seasons.is_empty());
    }

    #[test]
    fn test_two_seasons_in_order() {
        let dates = spaced_dates(ymd(2023, 1, 1), 100, 7);
        let values = double_season(100, 0.1, 0.7, 6.0);
        let seasons = detect_seasons(&dates, &values, &PhenologyConfig::default()).unwrap();

        assert_eq!(seasons.len(), 2);
        assert!(seasons[0].end_date < seasons[1].start_date);
        assert_eq!(seasons[0].start_date, ymd(2023, 4, 16));
        assert_eq!(seasons[1].end_date, ymd(2024, 8, 25));
        assert!(seasons.iter().all(|s| s.health == SeasonHealth::Good));
    }

    #[test]
    fn test_missing_values_are_tolerated() {
        let dates = every_five_days(70);
        let mut values = bell_curve(70, 0.1, 0.8, 35.0, 10.0);
        for i in [20, 21, 40, 50] {
            values[i] = f64::NAN;
        }
        let seasons = detect_seasons(&dates, &values, &PhenologyConfig::default()).unwrap();
        assert_eq!(seasons.len(), 1);
        assert_eq!(seasons[0].duration_days, 175);
    }

    #[test]
    fn test_short_input_has_no_seasons() {
        let dates = every_five_days(4);
        let values = [0.1, 0.5, 0.8, 0.9];
        assert!(detect_seasons(&dates, &values, &PhenologyConfig::default())
            .unwrap()
            .is_empty());
        assert!(detect_seasons(&[], &[], &PhenologyConfig::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_invalid_inputs() {
        let dates = every_five_days(10);
        assert_eq!(
            detect_seasons(&dates, &[0.1; 9], &PhenologyConfig::default()),
            Err(PhenologyError::LengthMismatch { dates: 10, values: 9 })
        );
        let even = PhenologyConfig {
            smoothing_window: 6,
            ..PhenologyConfig::default()
        };
        assert_eq!(
            detect_seasons(&dates, &[0.1; 10], &even),
            Err(PhenologyError::InvalidWindow(6))
        );
    }

    #[test]
    fn test_from_points() {
        let dates = every_five_days(70);
        let values = bell_curve(70, 0.1, 0.8, 35.0, 10.0);
        let points: Vec<TimeseriesPoint> = dates
            .iter()
            .zip(&values)
            .map(|(&d, &v)| TimeseriesPoint::new(d, v))
            .collect();
        let seasons = detect_seasons_from_points(&points, &PhenologyConfig::default()).unwrap();
        assert_eq!(seasons.len(), 1);
    }

    #[test]
    fn test_season_serde() {
        let season = Season {
            start_date: ymd(2024, 3, 1),
            peak_date: ymd(2024, 5, 1),
            peak_value: 0.75,
            end_date: ymd(2024, 8, 1),
            duration_days: 153,
            health: SeasonHealth::Excellent,
        };
        let json = serde_json::to_string(&season).unwrap();
        assert!(json.contains("\"health\":\"excellent\""));
        assert!(json.contains("\"start_date\":\"2024-03-01\""));
    }
}
