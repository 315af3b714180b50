//! Population aggregation over the hex grid.
//!
//! For every cell the engine collects the raster tiles overlapping the cell,
//! drops the ones it cannot use, merges the survivors into one pixel
//! footprint and sums the pixels whose centers fall inside the cell.
//!
//! ## Union Before Summarize
//!
//! Tiles may overlap each other. Pixels are therefore keyed by their position
//! on the store's pixel lattice and each position is taken once (from the tile
//! with the lowest id) before anything is summed. Summing per tile and adding
//! the sums would count the overlap twice.
//!
//! ## Skipped Contributions
//!
//! None of these abort the batch; they are counted in [`AggregationStats`]:
//!
//! - clip extents outside ±180°/±90° or wider than 180°/taller than 90°
//!   (cells drawn across the antimeridian), the cell keeps a null population
//! - tiles holding only no-data inside the clip extent
//! - tiles whose pixels don't sit on the store's lattice

use std::collections::BTreeMap;
use std::time::Instant;

use geo::{Contains, MultiPolygon, Point};
use rayon::prelude::*;

use crate::extent::BoundingBox;
use crate::grid::HexGrid;
use crate::query::area_sqkm;
use crate::store::{RasterStore, TileSet};

/// Statistics from an aggregation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationStats {
    /// Number of cells visited.
    pub cells_total: u64,
    /// Number of cells that received a population value.
    pub cells_populated: u64,
    /// Number of cells skipped because their extent fails the domain guard.
    pub cells_skipped_extent: u64,
    /// Number of tile candidates rejected as all no-data for their cell.
    pub tiles_rejected_nodata: u64,
    /// Number of tile candidates rejected as misaligned.
    pub tiles_misaligned: u64,
    /// Generation of the tile set the run read from.
    pub tile_generation: u64,
    /// Total elapsed time in milliseconds.
    pub elapsed_ms: u64,
}

/// Outcome of summing the raster under one geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZonalSum {
    /// Sum of the data pixels inside the geometry, `None` without coverage.
    pub population: Option<f64>,
    /// Number of distinct pixels summed.
    pub pixel_count: usize,
    /// The clip extent failed the global-domain guard.
    pub skipped_extent: bool,
    /// Candidates rejected as all no-data.
    pub rejected_nodata: u64,
    /// Candidates rejected as misaligned.
    pub misaligned: u64,
}

/// Population and area of an arbitrary polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonalStats {
    /// Population inside the polygon, `None` without raster coverage.
    pub population: Option<f64>,
    /// Geodesic area in km².
    pub area_sqkm: f64,
    /// Population per km², when both parts are known and the area is not zero.
    pub population_per_sqkm: Option<f64>,
}

/// Sum the unioned raster under `area`.
///
/// `extent` is the clip extent, normally the bounding box of `area`.
pub fn zonal_sum<G>(tiles: &TileSet, area: &G, extent: Option<BoundingBox>) -> ZonalSum
where
    G: Contains<Point<f64>>,
{
    let mut outcome = ZonalSum::default();

    let extent = match extent {
        Some(e) => e,
        None => return outcome,
    };
    if !extent.within_global_domain() {
        outcome.skipped_extent = true;
        return outcome;
    }
    let lattice = match tiles.lattice() {
        Some(l) => l,
        None => return outcome,
    };

    // Lattice (col, row) -> value; BTreeMap keeps the summation order stable
    let mut footprint: BTreeMap<(i64, i64), f64> = BTreeMap::new();

    for tile in tiles.tiles_intersecting(&extent) {
        if !tile.has_data_in(&extent) {
            outcome.rejected_nodata += 1;
            continue;
        }
        let (col_offset, row_offset) = match lattice.offset_of(tile) {
            Some(offset) => offset,
            None => {
                tracing::debug!(tile_id = tile.tile_id(), "Tile off the pixel lattice, skipping");
                outcome.misaligned += 1;
                continue;
            }
        };
        let (rows, cols) = match tile.pixel_window(&extent) {
            Some(window) => window,
            None => continue,
        };

        for row in rows {
            for col in cols.clone() {
                if let Some(v) = tile.value_at(row, col) {
                    footprint
                        .entry((col_offset + col as i64, row_offset + row as i64))
                        .or_insert(v);
                }
            }
        }
    }

    let mut sum = 0.0;
    for (&(col, row), &value) in &footprint {
        let (lon, lat) = lattice.pixel_center(col, row);
        if area.contains(&Point::new(lon, lat)) {
            sum += value;
            outcome.pixel_count += 1;
        }
    }

    if outcome.pixel_count > 0 {
        outcome.population = Some(sum);
    }
    outcome
}

/// Compute the population of every cell and store it on the grid.
///
/// Reads one snapshot of the raster store for the whole run and replaces all
/// cell populations at once when done, so readers see either the previous or
/// the new values. Rerunning on unchanged inputs yields the same values.
pub fn aggregate_population(grid: &HexGrid, store: &RasterStore) -> AggregationStats {
    let start = Instant::now();
    let tiles = store.snapshot();

    let outcomes: Vec<ZonalSum> = grid
        .cells()
        .par_iter()
        .map(|cell| {
            let outcome = zonal_sum(&tiles, cell.geometry(), cell.extent());
            if outcome.skipped_extent {
                tracing::debug!(
                    cell_id = cell.cell_id(),
                    "Cell extent outside the global domain, skipping"
                );
            }
            outcome
        })
        .collect();

    let mut stats = AggregationStats {
        cells_total: outcomes.len() as u64,
        tile_generation: tiles.generation(),
        ..Default::default()
    };
    let populations = outcomes
        .into_iter()
        .map(|o| {
            stats.cells_populated += o.population.is_some() as u64;
            stats.cells_skipped_extent += o.skipped_extent as u64;
            stats.tiles_rejected_nodata += o.rejected_nodata;
            stats.tiles_misaligned += o.misaligned;
            o.population
        })
        .collect();

    grid.replace_populations(populations);
    stats.elapsed_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        cells_total = stats.cells_total,
        cells_populated = stats.cells_populated,
        cells_skipped_extent = stats.cells_skipped_extent,
        tiles_rejected_nodata = stats.tiles_rejected_nodata,
        tiles_misaligned = stats.tiles_misaligned,
        tile_generation = stats.tile_generation,
        elapsed_ms = stats.elapsed_ms,
        "Population aggregation complete"
    );
    stats
}

/// Population and area of a caller polygon, using the same union rule.
pub fn population_in(store: &RasterStore, area: &MultiPolygon<f64>) -> ZonalStats {
    let tiles = store.snapshot();
    let sum = zonal_sum(&tiles, area, BoundingBox::of_multi_polygon(area));
    let area_sqkm = area_sqkm(area);

    ZonalStats {
        population: sum.population,
        area_sqkm,
        population_per_sqkm: sum
            .population
            .filter(|_| area_sqkm > 0.0)
            .map(|p| p / area_sqkm),
    }
}
