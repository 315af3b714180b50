use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

/// Hex-grid population aggregation CLI tool
#[derive(Parser)]
#[command(name = "popgrid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding raster sources and the results database
    #[arg(short, long, env = "POPGRID_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a population raster and aggregate it onto the hex grid
    Aggregate {
        /// Raster file (.bil or .zip)
        #[arg(env = "POPGRID_RASTER")]
        raster: PathBuf,

        /// Hex grid resolution (0-15)
        #[arg(short, long, env = "POPGRID_H3_RESOLUTION", default_value = "4")]
        resolution: u8,

        /// Raster tile size in pixels
        #[arg(short, long, env = "POPGRID_TILE_SIZE", default_value = "100")]
        tile_size: usize,

        /// Output file (.csv or .geojson)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Assign SHDI values to regions
    Resolve {
        /// Regions GeoJSON
        #[arg(env = "POPGRID_REGIONS")]
        regions: PathBuf,

        /// HDI GeoJSON
        #[arg(env = "POPGRID_HDI")]
        hdi: PathBuf,

        /// Output file (.csv or .geojson)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the hex cells intersecting a polygon as GeoJSON
    Cells {
        /// GeoJSON file with a Polygon or MultiPolygon
        polygon: PathBuf,

        /// Hex grid resolution (0-15)
        #[arg(short, long, env = "POPGRID_H3_RESOLUTION", default_value = "4")]
        resolution: u8,

        /// Maximum polygon area in km²
        #[arg(long, env = "POPGRID_GEOM_SIZE_LIMIT", default_value = "1000000")]
        size_limit: f64,

        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Read or write stored indicator results
    Result {
        /// Results database (defaults to <data-dir>/results.db)
        #[arg(long, env = "POPGRID_DB_PATH")]
        db: Option<PathBuf>,

        #[command(subcommand)]
        action: commands::result::Action,
    },

    /// Display information about a population raster
    Info {
        /// Raster file (.bil or .zip)
        raster: PathBuf,

        /// Tile size used to count tiles
        #[arg(short, long, env = "POPGRID_TILE_SIZE", default_value = "100")]
        tile_size: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("popgrid=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Aggregate {
            raster,
            resolution,
            tile_size,
            output,
        } => commands::aggregate::run(raster, resolution, tile_size, output),
        Commands::Resolve {
            regions,
            hdi,
            output,
        } => commands::resolve::run(regions, hdi, output),
        Commands::Cells {
            polygon,
            resolution,
            size_limit,
            output,
        } => commands::cells::run(polygon, resolution, size_limit, output),
        Commands::Result { db, action } => commands::result::run(cli.data_dir, db, action),
        Commands::Info { raster, tile_size } => commands::info::run(raster, tile_size),
    }
}
