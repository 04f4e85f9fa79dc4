//! Rolling rainfall accumulation over a daily series.
//!
//! Totals are kept incrementally with one bounded window per period, so a
//! multi-year daily record is processed in constant memory. The same applies
//! per pixel in [`RainfallRasters`], which holds only the short window of
//! daily rasters plus two running sums.

use chrono::NaiveDate;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use shared::{RingBuffer, RollingError, RollingSum, TimeseriesPoint};
use thiserror::Error;

pub const SHORT_WINDOW_DAYS: u32 = 7;
pub const LONG_WINDOW_DAYS: u32 = 30;

/// Rainfall totals for the windows ending on `date`, in mm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RainfallTotals {
    pub date: NaiveDate,
    pub daily: f64,
    pub short_total: f64,
    pub long_total: f64,
}

#[derive(Debug, Clone)]
pub struct RainfallAccumulator {
    short: RollingSum,
    long: RollingSum,
}

impl RainfallAccumulator {
    pub fn new(short_days: u32, long_days: u32) -> Result<Self, RollingError> {
        Ok(Self {
            short: RollingSum::new(short_days)?,
            long: RollingSum::new(long_days)?,
        })
    }

    /// 7- and 30-day windows.
    pub fn standard() -> Result<Self, RollingError> {
        Self::new(SHORT_WINDOW_DAYS, LONG_WINDOW_DAYS)
    }

    /// Add one day's rainfall. Dates must not go backwards.
    pub fn push(&mut self, date: NaiveDate, mm: f64) -> Result<RainfallTotals, RollingError> {
        let short_total = self.short.push(date, mm)?;
        let long_total = self.long.push(date, mm)?;
        Ok(RainfallTotals {
            date,
            daily: mm,
            short_total,
            long_total,
        })
    }
}

/// 7- and 30-day totals after each point of a chronological daily series.
pub fn rolling_rainfall(points: &[TimeseriesPoint]) -> Result<Vec<RainfallTotals>, RollingError> {
    let mut accumulator = RainfallAccumulator::standard()?;
    points
        .iter()
        .map(|p| accumulator.push(p.date, p.value))
        .collect()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RainfallError {
    #[error(transparent)]
    Rolling(#[from] RollingError),
    #[error("daily raster shape {got:?} differs from {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
}

/// Per-pixel totals over a run of daily rainfall rasters.
///
/// Rasters are pushed oldest first. The short total covers the last
/// `short_days` rasters pushed; the long total covers every raster pushed, so
/// callers feed it exactly the days of the long window. NaN pixels count as
/// no rain.
#[derive(Debug, Clone)]
pub struct RainfallRasters {
    recent: RingBuffer<Array2<f64>>,
    short_total: Option<Array2<f64>>,
    long_total: Option<Array2<f64>>,
    days: usize,
}

impl RainfallRasters {
    pub fn new(short_days: usize) -> Result<Self, RainfallError> {
        if short_days == 0 {
            return Err(RollingError::EmptyWindow.into());
        }
        Ok(Self {
            recent: RingBuffer::new(short_days),
            short_total: None,
            long_total: None,
            days: 0,
        })
    }

    /// 7-day short window.
    pub fn standard() -> Self {
        Self {
            recent: RingBuffer::new(SHORT_WINDOW_DAYS as usize),
            short_total: None,
            long_total: None,
            days: 0,
        }
    }

    /// Add the next day. A raster on a different grid is rejected.
    pub fn push(&mut self, daily: Array2<f64>) -> Result<(), RainfallError> {
        let daily = daily.mapv(|v| if v.is_nan() { 0.0 } else { v });
        if let Some(long) = &self.long_total {
            if long.dim() != daily.dim() {
                return Err(RainfallError::ShapeMismatch {
                    expected: long.dim(),
                    got: daily.dim(),
                });
            }
        }

        let long = self
            .long_total
            .get_or_insert_with(|| Array2::zeros(daily.dim()));
        *long += &daily;

        let short = self
            .short_total
            .get_or_insert_with(|| Array2::zeros(daily.dim()));
        *short += &daily;
        if let Some(evicted) = self.recent.push(daily) {
            Zip::from(short).and(&evicted).for_each(|s, &e| *s -= e);
        }
        self.days += 1;
        Ok(())
    }

    /// Rasters pushed so far.
    pub fn days(&self) -> usize {
        self.days
    }

    /// The most recent day, NaN pixels as zero.
    pub fn latest(&self) -> Option<&Array2<f64>> {
        self.recent.back()
    }

    pub fn short_total(&self) -> Option<&Array2<f64>> {
        self.short_total.as_ref()
    }

    pub fn long_total(&self) -> Option<&Array2<f64>> {
        self.long_total.as_ref()
    }
}
