//! Tiled raster store with atomic drop-and-reload.
//!
//! This module provides [`RasterStore`], the indexed home of the population
//! raster. Each ingestion builds a complete [`TileSet`] off to the side and
//! swaps it in under a write lock, so readers holding a snapshot never see a
//! mix of old and new tiles and a failed ingestion leaves the previous tiles
//! in place.
//!
//! ```ignore
//! use popgrid::RasterStore;
//!
//! let store = RasterStore::new();
//! let stats = store.ingest("/data/GHS_POP_E2015_GLOBE_R2019A_4326_30ss.bil", 100)?;
//! println!("{} tiles loaded in {}ms", stats.tiles_loaded, stats.elapsed_ms);
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;

use crate::error::{GridError, Result};
use crate::extent::BoundingBox;
use crate::source::RasterSource;
use crate::tile::{RasterTile, WGS84_SRID};

/// Fraction of a pixel a tile origin may be off the lattice and still align.
const ALIGNMENT_TOLERANCE: f64 = 1e-6;

type TileEntry = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Statistics from an ingestion.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    /// Number of tiles now queryable.
    pub tiles_loaded: u64,
    /// Number of tiles dropped because they held only no-data.
    pub tiles_empty: u64,
    /// Generation number of the tile set that was swapped in.
    pub generation: u64,
    /// Total elapsed time in milliseconds.
    pub elapsed_ms: u64,
}

/// The pixel grid every tile is expected to sit on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelLattice {
    pub origin_lon: f64,
    pub origin_lat: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl PixelLattice {
    fn of(tile: &RasterTile) -> Self {
        let (origin_lon, origin_lat) = tile.origin();
        let (pixel_width, pixel_height) = tile.pixel_size();
        Self {
            origin_lon,
            origin_lat,
            pixel_width,
            pixel_height,
        }
    }

    /// Lattice `(col, row)` of the tile's north-west pixel.
    ///
    /// Returns `None` when the tile has a different pixel size or its origin
    /// falls between lattice nodes.
    pub fn offset_of(&self, tile: &RasterTile) -> Option<(i64, i64)> {
        let (pw, ph) = tile.pixel_size();
        let same_size = ((pw - self.pixel_width) / self.pixel_width).abs() < ALIGNMENT_TOLERANCE
            && ((ph - self.pixel_height) / self.pixel_height).abs() < ALIGNMENT_TOLERANCE;
        if !same_size {
            return None;
        }

        let (lon, lat) = tile.origin();
        let col = (lon - self.origin_lon) / self.pixel_width;
        let row = (self.origin_lat - lat) / self.pixel_height;
        if (col - col.round()).abs() > ALIGNMENT_TOLERANCE
            || (row - row.round()).abs() > ALIGNMENT_TOLERANCE
        {
            return None;
        }

        Some((col.round() as i64, row.round() as i64))
    }

    /// Center of a lattice pixel as `(lon, lat)`.
    pub fn pixel_center(&self, col: i64, row: i64) -> (f64, f64) {
        (
            self.origin_lon + (col as f64 + 0.5) * self.pixel_width,
            self.origin_lat - (row as f64 + 0.5) * self.pixel_height,
        )
    }
}

/// One immutable generation of tiles with its spatial index.
pub struct TileSet {
    tiles: Vec<Arc<RasterTile>>,
    index: RTree<TileEntry>,
    lattice: Option<PixelLattice>,
    generation: u64,
}

impl TileSet {
    fn empty() -> Self {
        Self {
            tiles: Vec::new(),
            index: RTree::new(),
            lattice: None,
            generation: 0,
        }
    }

    fn build(tiles: Vec<RasterTile>, generation: u64) -> Result<Self> {
        let mut dims = None;
        for tile in &tiles {
            if tile.srid() != WGS84_SRID {
                return Err(GridError::UnsupportedCrs {
                    name: format!("EPSG:{}", tile.srid()),
                });
            }
            match dims {
                None => dims = Some(tile.dimensions()),
                Some(d) if d != tile.dimensions() => {
                    return Err(GridError::InconsistentTileSize {
                        message: format!(
                            "tile {} is {:?}, expected {:?}",
                            tile.tile_id(),
                            tile.dimensions(),
                            d
                        ),
                    });
                }
                Some(_) => {}
            }
        }

        let lattice = tiles.first().map(PixelLattice::of);
        let entries = tiles
            .iter()
            .enumerate()
            .map(|(i, tile)| {
                let e = tile.extent();
                GeomWithData::new(
                    Rectangle::from_corners([e.min_lon, e.min_lat], [e.max_lon, e.max_lat]),
                    i,
                )
            })
            .collect();

        Ok(Self {
            tiles: tiles.into_iter().map(Arc::new).collect(),
            index: RTree::bulk_load(entries),
            lattice,
            generation,
        })
    }

    /// Tiles whose extent overlaps `bbox`, ordered by tile id.
    pub fn tiles_intersecting(&self, bbox: &BoundingBox) -> Vec<&Arc<RasterTile>> {
        let mut found: Vec<&Arc<RasterTile>> = self
            .index
            .locate_in_envelope_intersecting(&bbox.to_aabb())
            .map(|entry| &self.tiles[entry.data])
            .filter(|tile| tile.extent().overlaps(bbox))
            .collect();
        found.sort_by_key(|tile| tile.tile_id());
        found
    }

    /// The pixel lattice defined by the first tile, if any.
    pub fn lattice(&self) -> Option<PixelLattice> {
        self.lattice
    }

    /// Generation counter; 0 for the initial empty set.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Whether the set holds no tiles.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Indexed population raster, replaced wholesale on each ingestion.
pub struct RasterStore {
    current: RwLock<Arc<TileSet>>,
    generation: AtomicU64,
}

impl Default for RasterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RasterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(TileSet::empty())),
            generation: AtomicU64::new(0),
        }
    }

    /// Ingest a global raster file, replacing all current tiles.
    ///
    /// # Arguments
    ///
    /// * `path` - `.bil` raster (or `.zip` containing one)
    /// * `tile_size` - Tile edge length in pixels
    ///
    /// # Errors
    ///
    /// Returns an error if the source is missing or malformed, its reference
    /// system is unsupported, or `tile_size` is zero. The previous tiles stay
    /// queryable in every error case.
    pub fn ingest<P: AsRef<Path>>(&self, path: P, tile_size: usize) -> Result<IngestStats> {
        let start = Instant::now();
        let source = RasterSource::open(path.as_ref())?;
        let (tiles, empty) = source.tiles(tile_size)?;

        let generation = self.replace_tiles(tiles)?;
        let tiles_loaded = self.tile_count() as u64;

        let stats = IngestStats {
            tiles_loaded,
            tiles_empty: empty as u64,
            generation,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        tracing::info!(
            path = %source.path().display(),
            tile_size,
            tiles_loaded = stats.tiles_loaded,
            tiles_empty = stats.tiles_empty,
            generation,
            elapsed_ms = stats.elapsed_ms,
            "Raster ingested"
        );
        Ok(stats)
    }

    /// Replace all tiles with `tiles`.
    ///
    /// All tiles must share one size and be tagged WGS84. Returns the new
    /// generation number.
    pub fn replace_tiles(&self, tiles: Vec<RasterTile>) -> Result<u64> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let set = TileSet::build(tiles, generation)?;
        *self.current.write() = Arc::new(set);
        Ok(generation)
    }

    /// A consistent view of the current tiles.
    pub fn snapshot(&self) -> Arc<TileSet> {
        self.current.read().clone()
    }

    /// Number of tiles currently queryable.
    pub fn tile_count(&self) -> usize {
        self.current.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::tests::write_test_raster;
    use tempfile::TempDir;

    fn tile(id: u32, lon: f64, lat: f64) -> RasterTile {
        RasterTile::new(id, lon, lat, 1.0, 2, 2, vec![1.0; 4]).unwrap()
    }

    #[test]
    fn test_replace_and_query() {
        let store = RasterStore::new();
        assert_eq!(store.tile_count(), 0);

        store
            .replace_tiles(vec![tile(2, 2.0, 2.0), tile(1, 0.0, 2.0)])
            .unwrap();
        assert_eq!(store.tile_count(), 2);

        let snapshot = store.snapshot();
        let found = snapshot.tiles_intersecting(&BoundingBox::new(0.5, 0.5, 1.5, 3.5));
        let ids: Vec<u32> = found.iter().map(|t| t.tile_id()).collect();
        assert_eq!(ids, vec![1, 2]);

        let found = snapshot.tiles_intersecting(&BoundingBox::new(0.5, 0.5, 1.5, 1.5));
        assert_eq!(found.len(), 1);

        assert!(snapshot
            .tiles_intersecting(&BoundingBox::new(10.0, 10.0, 11.0, 11.0))
            .is_empty());
    }

    #[test]
    fn test_inconsistent_tile_size_keeps_previous_tiles() {
        let store = RasterStore::new();
        store.replace_tiles(vec![tile(1, 0.0, 2.0)]).unwrap();

        let odd = RasterTile::new(3, 4.0, 2.0, 1.0, 1, 1, vec![1.0]).unwrap();
        let result = store.replace_tiles(vec![tile(2, 2.0, 2.0), odd]);
        assert!(matches!(result, Err(GridError::InconsistentTileSize { .. })));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.tiles_intersecting(&BoundingBox::new(0.0, 0.0, 2.0, 2.0))[0].tile_id(),
            1
        );
    }

    #[test]
    fn test_non_wgs84_tiles_rejected() {
        let store = RasterStore::new();
        let result = store.replace_tiles(vec![tile(1, 0.0, 2.0).with_srid(54009)]);
        assert!(matches!(result, Err(GridError::UnsupportedCrs { .. })));
        assert_eq!(store.tile_count(), 0);
    }

    #[test]
    fn test_snapshot_survives_replacement() {
        let store = RasterStore::new();
        store.replace_tiles(vec![tile(1, 0.0, 2.0)]).unwrap();
        let old = store.snapshot();

        store
            .replace_tiles(vec![tile(5, 0.0, 2.0), tile(6, 2.0, 2.0)])
            .unwrap();

        assert_eq!(old.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
        assert!(store.snapshot().generation() > old.generation());
    }

    #[test]
    fn test_lattice_alignment() {
        let lattice = PixelLattice::of(&tile(1, 0.0, 2.0));
        assert_eq!(lattice.offset_of(&tile(2, 2.0, 2.0)), Some((2, 0)));
        assert_eq!(lattice.offset_of(&tile(3, -4.0, 5.0)), Some((-4, -3)));
        // Half a pixel off
        assert_eq!(lattice.offset_of(&tile(4, 0.5, 2.0)), None);
        // Different pixel size
        let fine = RasterTile::new(5, 0.0, 2.0, 0.5, 2, 2, vec![1.0; 4]).unwrap();
        assert_eq!(lattice.offset_of(&fine), None);
        assert_eq!(lattice.pixel_center(0, 0), (0.5, 1.5));
    }

    #[test]
    fn test_ingest_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_test_raster(
            temp_dir.path(),
            "pop",
            (0.0, 2.0),
            (4, 2),
            &[1.0, 1.0, -200.0, -200.0, 1.0, 1.0, -200.0, -200.0],
        );

        let store = RasterStore::new();
        let stats = store.ingest(&path, 2).unwrap();
        assert_eq!(stats.tiles_loaded, 1);
        assert_eq!(stats.tiles_empty, 1);
        assert_eq!(stats.generation, 1);
    }

    #[test]
    fn test_failed_ingest_keeps_previous_tiles() {
        let temp_dir = TempDir::new().unwrap();
        let good = write_test_raster(temp_dir.path(), "good", (0.0, 1.0), (1, 1), &[5.0]);
        let bad = write_test_raster(temp_dir.path(), "bad", (0.0, 1.0), (2, 2), &[5.0]);

        let store = RasterStore::new();
        store.ingest(&good, 10).unwrap();
        assert!(store.ingest(&bad, 10).is_err());
        assert_eq!(store.tile_count(), 1);
    }
}
