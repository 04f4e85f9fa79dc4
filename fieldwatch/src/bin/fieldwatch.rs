//! Command line access to the offline parts of the field pipeline.
//!
//! Subcommands:
//! - `boundary`: build a circular or polygon field and print it as JSON
//! - `mask`: rasterise a field onto a grid around it
//! - `seasons`: detect growing seasons in a saved index series
//! - `rainfall`: rolling 7/30 day totals of a daily rainfall series
//! - `field`: save, list and delete named fields
//! - `config`: show or initialise the analysis configuration
//! - `analyze`: field series of one signal from a local scene archive
//! - `conditions`: newest vegetation, temperature, flood and rainfall state

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use fieldwatch::archive::LocalArchive;
use fieldwatch::config_storage::{self, AnalysisConfig, ConfigStorage};
use fieldwatch::phenology::detect_seasons_from_points;
use fieldwatch::pipeline::{field_radius_m, FieldAnalyzer, SignalKind};
use fieldwatch::rainfall::rolling_rainfall;
use fieldwatch::report::{format_conditions_report, format_season_report};
use log::info;
use shared::{Bbox, Crs, FieldBoundary, FieldMask, GridSpec, TimeseriesPoint, TimeseriesSummary};

#[derive(Parser, Debug)]
#[command(name = "fieldwatch")]
#[command(about = "Field boundary, mask and growing-season tools")]
#[command(version)]
struct Args {
    /// Configuration directory (defaults to ~/.fieldwatch)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a field boundary and print it as JSON
    Boundary {
        #[command(flatten)]
        field: FieldArgs,
    },

    /// Rasterise a field onto a grid around it
    Mask {
        #[command(flatten)]
        field: FieldArgs,

        /// Grid rows and columns
        #[arg(long, default_value = "64")]
        size: usize,

        /// Bbox padding as a multiple of the field radius
        #[arg(long, default_value = "1.5")]
        padding: f64,

        /// Rasterise in the local UTM zone instead of WGS84
        #[arg(long)]
        utm: bool,
    },

    /// Detect growing seasons in a JSON array of time series points
    Seasons {
        /// Input file
        input: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Report title for markdown output
        #[arg(long, default_value = "Growing seasons")]
        title: String,
    },

    /// Rolling rainfall totals of a JSON array of daily points
    Rainfall {
        /// Input file
        input: PathBuf,
    },

    /// Manage saved fields
    Field {
        #[command(subcommand)]
        action: FieldAction,
    },

    /// Show or initialise the analysis configuration
    Config {
        /// Write the defaults if no configuration exists
        #[arg(long)]
        init: bool,
    },

    /// Extract a field series from a local scene archive
    Analyze {
        /// Archive directory holding scenes.json and bands/
        #[arg(long)]
        archive: PathBuf,

        #[command(flatten)]
        source: FieldSource,

        /// Vegetation index name, "lst" or "rainfall"
        #[arg(long, default_value = "ndvi")]
        signal: SignalKind,

        /// First day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        /// Reduce scenes on all cores
        #[arg(long)]
        parallel: bool,
    },

    /// Current state of a field from the newest scene of each sensor
    Conditions {
        /// Archive directory holding scenes.json and bands/
        #[arg(long)]
        archive: PathBuf,

        #[command(flatten)]
        source: FieldSource,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Report title for markdown output
        #[arg(long, default_value = "Current conditions")]
        title: String,
    },
}

#[derive(Subcommand, Debug)]
enum FieldAction {
    /// Save a field under a name
    Save {
        name: String,
        #[command(flatten)]
        field: FieldArgs,
    },
    /// List saved fields
    List,
    /// Print a saved field as JSON
    Show { name: String },
    /// Delete a saved field
    Delete { name: String },
}

#[derive(clap::Args, Debug)]
struct FieldArgs {
    /// Circle center latitude
    #[arg(long, requires_all = ["lon", "radius"])]
    lat: Option<f64>,

    /// Circle center longitude
    #[arg(long)]
    lon: Option<f64>,

    /// Circle radius in meters
    #[arg(long)]
    radius: Option<f64>,

    /// Polygon vertex as "lat,lon"; repeat for each vertex
    #[arg(long = "vertex", value_parser = parse_vertex, conflicts_with = "lat")]
    vertices: Vec<(f64, f64)>,
}

impl FieldArgs {
    fn boundary(&self) -> Result<FieldBoundary> {
        if let (Some(lat), Some(lon), Some(radius)) = (self.lat, self.lon, self.radius) {
            return FieldBoundary::circular(lat, lon, radius).context("invalid circular field");
        }
        if self.vertices.is_empty() {
            bail!("give either --lat/--lon/--radius or at least three --vertex values");
        }
        FieldBoundary::polygon(&self.vertices).context("invalid polygon field")
    }
}

/// A field given inline or by saved name.
#[derive(clap::Args, Debug)]
struct FieldSource {
    #[command(flatten)]
    field: FieldArgs,

    /// Name of a saved field
    #[arg(long, conflicts_with_all = ["lat", "vertices"])]
    saved: Option<String>,
}

impl FieldSource {
    fn boundary(&self, storage: &ConfigStorage) -> Result<FieldBoundary> {
        let Some(name) = &self.saved else {
            return self.field.boundary();
        };
        match storage.load_field(name) {
            Some(boundary) => boundary.with_context(|| format!("failed to load field '{name}'")),
            None => bail!("no field named '{name}'"),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Json,
    Markdown,
}

fn parse_vertex(s: &str) -> Result<(f64, f64), String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected 'lat,lon', got '{s}'"))?;
    let lat = lat.trim().parse().map_err(|e| format!("bad latitude: {e}"))?;
    let lon = lon.trim().parse().map_err(|e| format!("bad longitude: {e}"))?;
    Ok((lat, lon))
}

fn read_points(path: &Path) -> Result<Vec<TimeseriesPoint>> {
    config_storage::read_points(path)
        .with_context(|| format!("{} is not a readable JSON array of points", path.display()))
}

fn cmd_mask(field: &FieldArgs, size: usize, padding: f64, utm: bool) -> Result<()> {
    let boundary = field.boundary()?;
    let center = boundary.centroid();
    let bbox = Bbox::for_radius(center.lat, center.lon, field_radius_m(&boundary), padding);
    let crs = if utm {
        Crs::utm_for(center.lon, center.lat)
    } else {
        Crs::Wgs84
    };

    let mask = FieldMask::create(&boundary, GridSpec::new((size, size), bbox, crs))
        .context("failed to rasterise field")?;
    println!("Grid:     {size}x{size} EPSG:{}", crs.epsg());
    println!(
        "Bbox:     [{:.6}, {:.6}, {:.6}, {:.6}]",
        bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y
    );
    println!("Area:     {:.3} ha", boundary.area_ha());
    println!("Pixels:   {}", mask.pixel_count());
    println!("Coverage: {:.1}%", mask.coverage() * 100.0);
    Ok(())
}

fn cmd_seasons(
    storage: &ConfigStorage,
    input: &Path,
    format: OutputFormat,
    title: &str,
) -> Result<()> {
    let config = storage
        .load_or_default()
        .context("failed to load configuration")?;
    let points = read_points(input)?;
    let seasons = detect_seasons_from_points(&points, &config.phenology)?;
    info!("Detected {} seasons", seasons.len());

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&seasons)?),
        OutputFormat::Markdown => {
            let summary = TimeseriesSummary::from_points(&points);
            print!("{}", format_season_report(title, &seasons, Some(&summary))?);
        }
    }
    Ok(())
}

fn cmd_field(storage: &ConfigStorage, action: &FieldAction) -> Result<()> {
    match action {
        FieldAction::Save { name, field } => {
            let path = storage.save_field(name, &field.boundary()?)?;
            println!("Saved {name} to {}", path.display());
        }
        FieldAction::List => {
            for name in storage.list_fields()? {
                println!("{name}");
            }
        }
        FieldAction::Show { name } => match storage.load_field(name) {
            Some(boundary) => println!("{}", serde_json::to_string_pretty(&boundary?)?),
            None => bail!("no field named '{name}'"),
        },
        FieldAction::Delete { name } => {
            if !storage.delete_field(name)? {
                bail!("no field named '{name}'");
            }
            println!("Deleted {name}");
        }
    }
    Ok(())
}

fn cmd_config(storage: &ConfigStorage, init: bool) -> Result<()> {
    let config = match storage.load_analysis_config() {
        Some(config) => config.context("failed to load configuration")?,
        None if init => {
            let config = AnalysisConfig::default();
            let path = storage.save_analysis_config(&config)?;
            info!("Wrote default configuration to {}", path.display());
            config
        }
        None => AnalysisConfig::default(),
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn open_archive(path: &Path) -> Result<LocalArchive> {
    LocalArchive::open(path).with_context(|| format!("failed to open archive {}", path.display()))
}

fn cmd_analyze(
    storage: &ConfigStorage,
    archive: &Path,
    source: &FieldSource,
    signal: SignalKind,
    date_range: (NaiveDate, NaiveDate),
    parallel: bool,
) -> Result<()> {
    if date_range.0 > date_range.1 {
        bail!("--start {} is after --end {}", date_range.0, date_range.1);
    }
    let config = storage
        .load_or_default()
        .context("failed to load configuration")?;
    let boundary = source.boundary(storage)?;
    let archive = open_archive(archive)?;

    let analysis = FieldAnalyzer::new(&archive, &archive, config)
        .with_parallel(parallel)
        .analyze(&boundary, signal, date_range)?;
    info!(
        "{} points from {} scenes",
        analysis.points.len(),
        analysis.scenes_found
    );
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

fn cmd_conditions(
    storage: &ConfigStorage,
    archive: &Path,
    source: &FieldSource,
    format: OutputFormat,
    title: &str,
) -> Result<()> {
    let config = storage
        .load_or_default()
        .context("failed to load configuration")?;
    let boundary = source.boundary(storage)?;
    let archive = open_archive(archive)?;

    let conditions = FieldAnalyzer::new(&archive, &archive, config).current_conditions(&boundary)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&conditions)?),
        OutputFormat::Markdown => print!("{}", format_conditions_report(title, &conditions)?),
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let storage = match args.config_dir {
        Some(dir) => ConfigStorage::with_path(dir),
        None => ConfigStorage::new()?,
    };

    match args.command {
        Command::Boundary { field } => {
            println!("{}", serde_json::to_string_pretty(&field.boundary()?)?);
            Ok(())
        }
        Command::Mask {
            field,
            size,
            padding,
            utm,
        } => cmd_mask(&field, size, padding, utm),
        Command::Seasons {
            input,
            format,
            title,
        } => cmd_seasons(&storage, &input, format, &title),
        Command::Rainfall { input } => {
            let totals = rolling_rainfall(&read_points(&input)?)?;
            println!("{}", serde_json::to_string_pretty(&totals)?);
            Ok(())
        }
        Command::Field { action } => cmd_field(&storage, &action),
        Command::Config { init } => cmd_config(&storage, init),
        Command::Analyze {
            archive,
            source,
            signal,
            start,
            end,
            parallel,
        } => cmd_analyze(&storage, &archive, &source, signal, (start, end), parallel),
        Command::Conditions {
            archive,
            source,
            format,
            title,
        } => cmd_conditions(&storage, &archive, &source, format, &title),
    }
}
