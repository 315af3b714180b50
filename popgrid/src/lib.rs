//! # popgrid - Hex-Grid Population Aggregation
//!
//! Library for joining a global gridded population raster with a hexagonal
//! discrete global grid and with administrative boundary polygons.
//!
//! ## Features
//!
//! - **Union before summarize**: overlapping raster tiles never double count
//! - **Global-domain guard**: cells with a degenerate lon/lat extent are
//!   skipped, not failed
//! - **Atomic reloads**: raster tiles are swapped in as one snapshot
//! - **Deterministic HDI resolution** for sub-national and country regions
//! - **Result store**: SQLite-backed upserts with a read cache
//!
//! ## Quick Start
//!
//! ```ignore
//! use popgrid::{aggregate_population, HexGrid, RasterStore};
//!
//! let store = RasterStore::new();
//! store.ingest("/data/ghs_pop.zip", 100)?;
//!
//! let grid = HexGrid::generate(4)?;
//! let stats = aggregate_population(&grid, &store);
//! println!("{} of {} cells populated", stats.cells_populated, stats.cells_total);
//! ```
//!
//! ## Raster Format
//!
//! Population rasters are ESRI BIL files (`.bil` body, `.hdr` header, optional
//! `.prj`) in geographic WGS84 coordinates, optionally zipped. See
//! [`source`] for the header keys that are understood.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod extent;
pub mod grid;
pub mod import;
pub mod query;
pub mod region;
pub mod results;
pub mod source;
pub mod store;
pub mod tile;

// Re-export main types at crate root for convenience
pub use aggregate::{aggregate_population, population_in, AggregationStats, ZonalStats};
pub use config::Settings;
pub use error::{GridError, Result};
pub use extent::BoundingBox;
pub use grid::{HexCell, HexGrid};
pub use region::{resolve_all, resolve_shdi, HdiRecord, HdiTable, Region, RegionKind};
pub use results::{IndicatorResult, ResultKey, ResultStore};
pub use store::{IngestStats, RasterStore};
pub use tile::RasterTile;
