//! Per-scene field observations and their summaries.

use chrono::NaiveDate;
use crop_math::stats::{mean, population_std};
use serde::{Deserialize, Deserializer, Serialize};

use crate::field_stats::FieldStatistics;

/// Provenance and spread of one observation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointMetadata {
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Valid pixels the value was reduced from.
    pub count: usize,
    /// Fraction of field pixels flagged as cloud, `0.0` without a quality band.
    pub cloud_fraction: f64,
    pub scene_id: String,
}

/// One accepted scene reduced to a field-level scalar.
///
/// A NaN value marks a gap. JSON has no NaN, so gaps are written as `null`
/// and read back as NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesPoint {
    pub date: NaiveDate,
    #[serde(deserialize_with = "value_or_gap")]
    pub value: f64,
    #[serde(default)]
    pub metadata: PointMetadata,
}

fn value_or_gap<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl TimeseriesPoint {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self {
            date,
            value,
            metadata: PointMetadata::default(),
        }
    }

    /// Build a point from field statistics; `None` when no pixel was valid.
    pub fn from_statistics(
        date: NaiveDate,
        stats: &FieldStatistics,
        cloud_fraction: f64,
        scene_id: impl Into<String>,
    ) -> Option<Self> {
        let value = stats.mean?;
        Some(Self {
            date,
            value,
            metadata: PointMetadata {
                std: stats.std,
                min: stats.min,
                max: stats.max,
                count: stats.count,
                cloud_fraction,
                scene_id: scene_id.into(),
            },
        })
    }
}

/// Aggregate of a series of point values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeseriesSummary {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    /// Sum of all values, meaningful for accumulating signals such as rainfall.
    pub total: Option<f64>,
    pub count: usize,
}

impl TimeseriesSummary {
    /// Summary of the points' values. Gaps are left out.
    pub fn from_points(points: &[TimeseriesPoint]) -> Self {
        let values: Vec<f64> = points
            .iter()
            .map(|p| p.value)
            .filter(|v| !v.is_nan())
            .collect();
        Self::from_values(&values)
    }

    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        Self {
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            mean: mean(values),
            std: population_std(values),
            total: Some(values.iter().sum()),
            count: values.len(),
        }
    }
}

/// Split points into parallel date and value vectors.
pub fn unzip_points(points: &[TimeseriesPoint]) -> (Vec<NaiveDate>, Vec<f64>) {
    points.iter().map(|p| (p.date, p.value)).unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_from_statistics() {
        let stats = FieldStatistics {
            mean: Some(0.62),
            std: Some(0.05),
            min: Some(0.4),
            max: Some(0.8),
            median: Some(0.63),
            count: 812,
            percentiles: vec![],
        };
        let point = TimeseriesPoint::from_statistics(day(4), &stats, 0.12, "S2B_X").unwrap();
        assert_eq!(point.value, 0.62);
        assert_eq!(point.metadata.count, 812);
        assert_eq!(point.metadata.cloud_fraction, 0.12);
        assert_eq!(point.metadata.scene_id, "S2B_X");

        let empty = FieldStatistics::default();
        assert!(TimeseriesPoint::from_statistics(day(4), &empty, 0.0, "S2B_X").is_none());
    }

    #[test]
    fn test_summary() {
        let points: Vec<_> = [0.2, 0.4, 0.6, 0.8]
            .iter()
            .enumerate()
            .map(|(i, &v)| TimeseriesPoint::new(day(i as u32 + 1), v))
            .collect();
        let summary = TimeseriesSummary::from_points(&points);
        assert_eq!(summary.count, 4);
        assert_eq!(summary.min, Some(0.2));
        assert_eq!(summary.max, Some(0.8));
        assert_relative_eq!(summary.mean.unwrap(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(summary.total.unwrap(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(summary.std.unwrap(), 0.05_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_null_value_reads_as_gap() {
        let json = r#"[
            {"date": "2024-03-01", "value": 0.3},
            {"date": "2024-03-06", "value": null},
            {"date": "2024-03-11", "value": 0.5, "metadata": {"std": null, "min": null, "max": null, "count": 9, "cloud_fraction": 0.0, "scene_id": "S2A_1"}}
        ]"#;
        let points: Vec<TimeseriesPoint> = serde_json::from_str(json).unwrap();
        assert_eq!(points.len(), 3);
        assert!(points[1].value.is_nan());
        assert_eq!(points[2].metadata.count, 9);

        // A gap survives a write and read
        let back: Vec<TimeseriesPoint> =
            serde_json::from_str(&serde_json::to_string(&points).unwrap()).unwrap();
        assert!(back[1].value.is_nan());
        assert_eq!(back[0], points[0]);

        let summary = TimeseriesSummary::from_points(&points);
        assert_eq!(summary.count, 2);
        assert_relative_eq!(summary.mean.unwrap(), 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_summary() {
        let summary = TimeseriesSummary::from_points(&[]);
        assert_eq!(summary, TimeseriesSummary::default());
        assert_eq!(summary.count, 0);
        assert!(summary.mean.is_none());
    }

    #[test]
    fn test_unzip_points() {
        let points = vec![TimeseriesPoint::new(day(1), 1.0), TimeseriesPoint::new(day(2), 2.0)];
        let (dates, values) = unzip_points(&points);
        assert_eq!(dates, vec![day(1), day(2)]);
        assert_eq!(values, vec![1.0, 2.0]);
    }
}
