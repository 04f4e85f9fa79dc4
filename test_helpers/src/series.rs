//! Synthetic NDVI-like series.

use chrono::{Days, NaiveDate};

/// `count` dates starting at `start`, `step_days` apart.
pub fn spaced_dates(start: NaiveDate, count: usize, step_days: u64) -> Vec<NaiveDate> {
    (0..count as u64)
        .map(|i| start + Days::new(i * step_days))
        .collect()
}

/// `count` consecutive days starting at `start`.
pub fn daily_dates(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    spaced_dates(start, count, 1)
}

/// Gaussian bump from `base` up to `peak`, centered at sample `center` with
/// standard deviation `width` samples.
pub fn bell_curve(count: usize, base: f64, peak: f64, center: f64, width: f64) -> Vec<f64> {
    (0..count)
        .map(|i| {
            let z = (i as f64 - center) / width;
            base + (peak - base) * (-0.5 * z * z).exp()
        })
        .collect()
}

/// Two bell curves in one series, as in a bimodal rainfall region.
pub fn double_season(count: usize, base: f64, peak: f64, width: f64) -> Vec<f64> {
    let first = bell_curve(count, base, peak, count as f64 * 0.25, width);
    let second = bell_curve(count, base, peak, count as f64 * 0.75, width);
    first
        .iter()
        .zip(&second)
        .map(|(a, b)| a.max(*b))
        .collect()
}
