//! Population raster tiles.
//!
//! This module provides the [`RasterTile`] struct: one fixed-size block of the
//! global population raster together with its georeference.

use std::ops::Range;

use crate::error::{GridError, Result};
use crate::extent::BoundingBox;

/// Spatial reference identifier of geographic WGS84 lon/lat.
pub const WGS84_SRID: u32 = 4326;

/// No-data marker used by the GHS population grids.
pub const DEFAULT_NODATA: f32 = -200.0;

/// A rectangular block of population-count pixels.
///
/// Pixels are stored row-major, row 0 being the northern edge. The
/// georeference is the north-west corner plus the pixel size in degrees.
///
/// # Example
///
/// ```
/// use popgrid::tile::{RasterTile, WGS84_SRID};
///
/// let tile = RasterTile::new(0, 8.0, 50.0, 0.5, 2, 2, vec![1.0, 2.0, 3.0, 4.0])?
///     .with_nodata(Some(-200.0));
/// assert_eq!(tile.srid(), WGS84_SRID);
/// assert_eq!(tile.value_at(1, 1), Some(4.0));
/// # Ok::<(), popgrid::GridError>(())
/// ```
#[derive(Debug, Clone)]
pub struct RasterTile {
    tile_id: u32,
    /// Longitude of the western edge
    origin_lon: f64,
    /// Latitude of the northern edge
    origin_lat: f64,
    /// Pixel width in degrees of longitude
    pixel_width: f64,
    /// Pixel height in degrees of latitude (positive)
    pixel_height: f64,
    cols: usize,
    rows: usize,
    srid: u32,
    nodata: Option<f32>,
    data: Vec<f32>,
}

impl RasterTile {
    /// Create a square-pixel tile in WGS84.
    ///
    /// # Arguments
    ///
    /// * `tile_id` - Identifier, unique within one store
    /// * `origin_lon` - Longitude of the western edge
    /// * `origin_lat` - Latitude of the northern edge
    /// * `pixel_size` - Pixel edge length in degrees
    /// * `cols`, `rows` - Tile dimensions in pixels
    /// * `data` - Row-major pixel values, `cols * rows` long
    ///
    /// # Errors
    ///
    /// Returns an error if the data length doesn't match the dimensions or the
    /// pixel size is not a positive finite number.
    pub fn new(
        tile_id: u32,
        origin_lon: f64,
        origin_lat: f64,
        pixel_size: f64,
        cols: usize,
        rows: usize,
        data: Vec<f32>,
    ) -> Result<Self> {
        Self::with_pixel_size(
            tile_id,
            origin_lon,
            origin_lat,
            (pixel_size, pixel_size),
            (cols, rows),
            data,
        )
    }

    /// Create a tile with distinct pixel width and height.
    pub fn with_pixel_size(
        tile_id: u32,
        origin_lon: f64,
        origin_lat: f64,
        (pixel_width, pixel_height): (f64, f64),
        (cols, rows): (usize, usize),
        data: Vec<f32>,
    ) -> Result<Self> {
        if !(pixel_width.is_finite() && pixel_width > 0.0)
            || !(pixel_height.is_finite() && pixel_height > 0.0)
        {
            return Err(GridError::malformed(format!(
                "tile {tile_id}: pixel size must be positive, got {pixel_width}x{pixel_height}"
            )));
        }
        if cols == 0 || rows == 0 || data.len() != cols * rows {
            return Err(GridError::malformed(format!(
                "tile {tile_id}: {} values for {cols}x{rows} pixels",
                data.len()
            )));
        }

        Ok(Self {
            tile_id,
            origin_lon,
            origin_lat,
            pixel_width,
            pixel_height,
            cols,
            rows,
            srid: WGS84_SRID,
            nodata: None,
            data,
        })
    }

    /// Set the no-data marker.
    pub fn with_nodata(mut self, nodata: Option<f32>) -> Self {
        self.nodata = nodata;
        self
    }

    /// Tag the tile with a spatial reference identifier.
    pub fn with_srid(mut self, srid: u32) -> Self {
        self.srid = srid;
        self
    }

    /// Returns the tile identifier.
    pub fn tile_id(&self) -> u32 {
        self.tile_id
    }

    /// Returns the spatial reference identifier.
    pub fn srid(&self) -> u32 {
        self.srid
    }

    /// Returns `(cols, rows)`.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    /// Returns `(pixel_width, pixel_height)` in degrees.
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.pixel_width, self.pixel_height)
    }

    /// Returns the north-west corner as `(lon, lat)`.
    pub fn origin(&self) -> (f64, f64) {
        (self.origin_lon, self.origin_lat)
    }

    /// Geographic extent covered by the tile.
    pub fn extent(&self) -> BoundingBox {
        BoundingBox::new(
            self.origin_lat - self.rows as f64 * self.pixel_height,
            self.origin_lon,
            self.origin_lat,
            self.origin_lon + self.cols as f64 * self.pixel_width,
        )
    }

    /// Get the pixel value at a row/column index.
    ///
    /// Returns `None` for no-data, NaN, or indices outside the tile.
    pub fn value_at(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let v = self.data[row * self.cols + col];
        if v.is_nan() || self.nodata == Some(v) {
            None
        } else {
            Some(v as f64)
        }
    }

    /// Rows and columns of the pixels whose footprint overlaps `bbox`.
    ///
    /// Returns `None` if the tile and the box share no area.
    pub fn pixel_window(&self, bbox: &BoundingBox) -> Option<(Range<usize>, Range<usize>)> {
        let clip = self.extent().intersection(bbox)?;

        // Rows are inverted - row 0 is the north edge
        let row_start = ((self.origin_lat - clip.max_lat) / self.pixel_height).floor() as usize;
        let row_end = ((self.origin_lat - clip.min_lat) / self.pixel_height).ceil() as usize;
        let col_start = ((clip.min_lon - self.origin_lon) / self.pixel_width).floor() as usize;
        let col_end = ((clip.max_lon - self.origin_lon) / self.pixel_width).ceil() as usize;

        let rows = row_start.min(self.rows)..row_end.min(self.rows);
        let cols = col_start.min(self.cols)..col_end.min(self.cols);
        if rows.is_empty() || cols.is_empty() {
            None
        } else {
            Some((rows, cols))
        }
    }

    /// Whether any pixel overlapping `bbox` carries data.
    pub fn has_data_in(&self, bbox: &BoundingBox) -> bool {
        match self.pixel_window(bbox) {
            Some((rows, cols)) => rows
                .flat_map(|row| cols.clone().map(move |col| (row, col)))
                .any(|(row, col)| self.value_at(row, col).is_some()),
            None => false,
        }
    }

    /// Whether any pixel of the tile carries data.
    pub fn has_data(&self) -> bool {
        self.data
            .iter()
            .any(|v| !v.is_nan() && self.nodata != Some(*v))
    }
}
