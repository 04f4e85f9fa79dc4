//! Markdown summaries of detected seasons and current conditions.

use crate::conditions::{CurrentConditions, NdviSource};
use crate::phenology::{Season, SeasonHealth};
use shared::TimeseriesSummary;
use std::fmt::{self, Write};

/// Number of seasons per health class, in [`SeasonHealth::ALL`] order.
pub fn health_tally(seasons: &[Season]) -> Vec<(SeasonHealth, usize)> {
    SeasonHealth::ALL
        .iter()
        .map(|&health| {
            let count = seasons.iter().filter(|s| s.health == health).count();
            (health, count)
        })
        .collect()
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"))
}

/// Render a season table, a health tally and optionally the series summary.
pub fn format_season_report(
    title: &str,
    seasons: &[Season],
    summary: Option<&TimeseriesSummary>,
) -> Result<String, fmt::Error> {
    let mut output = String::new();
    writeln!(output, "# {title}")?;
    writeln!(output)?;

    if let Some(summary) = summary {
        writeln!(output, "## Observations")?;
        writeln!(output)?;
        writeln!(output, "- Count: {}", summary.count)?;
        writeln!(output, "- Mean: {}", fmt_opt(summary.mean))?;
        writeln!(output, "- Std: {}", fmt_opt(summary.std))?;
        writeln!(
            output,
            "- Range: {} to {}",
            fmt_opt(summary.min),
            fmt_opt(summary.max)
        )?;
        writeln!(output)?;
    }

    writeln!(output, "## Seasons")?;
    writeln!(output)?;
    if seasons.is_empty() {
        writeln!(output, "No seasons detected.")?;
        return Ok(output);
    }

    writeln!(output, "| # | Start | Peak | End | Days | Peak value | Health |")?;
    writeln!(output, "|---|---|---|---|---|---|---|")?;
    for (i, season) in seasons.iter().enumerate() {
        writeln!(
            output,
            "| {} | {} | {} | {} | {} | {:.3} | {} |",
            i + 1,
            season.start_date,
            season.peak_date,
            season.end_date,
            season.duration_days,
            season.peak_value,
            season.health
        )?;
    }
    writeln!(output)?;

    let tally: Vec<String> = health_tally(seasons)
        .into_iter()
        .map(|(health, count)| format!("{health} {count}"))
        .collect();
    writeln!(output, "Health: {}", tally.join(", "))?;
    Ok(output)
}

/// Render one section per sensor layer of a conditions snapshot.
pub fn format_conditions_report(
    title: &str,
    conditions: &CurrentConditions,
) -> Result<String, fmt::Error> {
    let mut output = String::new();
    writeln!(output, "# {title}")?;
    writeln!(output)?;
    writeln!(
        output,
        "Field: {:.3} ha at ({:.5}, {:.5})",
        conditions.boundary.area_ha(),
        conditions.boundary.centroid().lat,
        conditions.boundary.centroid().lon
    )?;
    writeln!(output)?;

    writeln!(output, "## Vegetation")?;
    writeln!(output)?;
    match &conditions.vegetation {
        Some(vegetation) => {
            let source = match vegetation.source {
                NdviSource::Sentinel2 => "Sentinel-2",
                NdviSource::Landsat => "Landsat",
            };
            writeln!(
                output,
                "- Scene: {} ({}, {source})",
                vegetation.scene_id, vegetation.date
            )?;
            for (index, value) in &vegetation.indices {
                writeln!(output, "- {}: {value:.3}", index.to_string().to_uppercase())?;
            }
            if let Some(pct) = vegetation.scene_cloud_pct {
                writeln!(output, "- Sentinel-2 cloud: {pct:.1}%")?;
            }
        }
        None => writeln!(output, "No vegetation data.")?,
    }
    writeln!(output)?;

    writeln!(output, "## Land surface temperature")?;
    writeln!(output)?;
    match &conditions.temperature {
        Some(lst) => {
            writeln!(output, "- Scene: {} ({})", lst.scene_id, lst.date)?;
            writeln!(output, "- Mean: {} C", fmt_opt(lst.celsius.mean))?;
            let anomaly = lst.anomaly.as_ref().and_then(|a| a.mean);
            writeln!(output, "- Anomaly: {} C", fmt_opt(anomaly))?;
        }
        None => writeln!(output, "No temperature data.")?,
    }
    writeln!(output)?;

    writeln!(output, "## Flooding")?;
    writeln!(output)?;
    match &conditions.flood {
        Some(flood) => {
            writeln!(output, "- Scene: {} ({})", flood.scene_id, flood.date)?;
            writeln!(output, "- Flooded: {:.1}% of field", flood.field_fraction * 100.0)?;
            writeln!(output, "- Mean risk: {}", fmt_opt(flood.risk.mean))?;
        }
        None => writeln!(output, "No radar data.")?,
    }
    writeln!(output)?;

    writeln!(output, "## Rainfall")?;
    writeln!(output)?;
    match &conditions.rainfall {
        Some(rain) => {
            writeln!(output, "- Latest day: {} ({} days read)", rain.latest_date, rain.days)?;
            writeln!(output, "- Daily: {} mm", fmt_opt(rain.daily_mm))?;
            writeln!(output, "- 7 day: {} mm", fmt_opt(rain.short_total_mm))?;
            writeln!(output, "- 30 day: {} mm", fmt_opt(rain.long_total_mm))?;
        }
        None => writeln!(output, "No rainfall data.")?,
    }
    Ok(output)
}
