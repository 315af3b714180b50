//! Error types for the popgrid library.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while ingesting, aggregating or querying grid data.
///
/// Per-cell edge failures during aggregation (oversized clip extents, tiles
/// off the pixel lattice) are never surfaced here; they are counted in
/// [`crate::aggregate::AggregationStats`] instead. A missing indicator result
/// is `Ok(None)`, not an error.
#[derive(Error, Debug)]
pub enum GridError {
    /// IO error when reading files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The raster header or body could not be parsed.
    #[error("Malformed raster: {message}")]
    MalformedRaster { message: String },

    /// Raster body size doesn't match the dimensions announced by its header.
    #[error("Invalid raster body size: {size} bytes (expected {expected})")]
    InvalidFileSize { size: usize, expected: usize },

    /// The raster is stored in a reference system the store cannot ingest.
    #[error("Unsupported reference system: {name} (only geographic WGS84 lon/lat is supported)")]
    UnsupportedCrs { name: String },

    /// Tiles handed to the store do not share one tile size or pixel size.
    #[error("Inconsistent tiles: {message}")]
    InconsistentTileSize { message: String },

    /// Requested tile size is zero.
    #[error("Invalid tile size: {size}")]
    InvalidTileSize { size: usize },

    /// A raster file referenced by path does not exist.
    #[error("Raster file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// A caller-supplied geometry was rejected.
    #[error("Invalid geometry: {message}")]
    InvalidGeometry { message: String },

    /// An imported feature lacks a required property or carries one of the
    /// wrong type.
    #[error("Invalid feature property: {message}")]
    InvalidProperty { message: String },

    /// Query polygon exceeds the configured area limit.
    #[error("Input geometry is too big: {area_sqkm:.1} km² (limit {limit_sqkm} km²)")]
    SizeRestriction { area_sqkm: f64, limit_sqkm: f64 },

    /// Two cells with the same identifier were handed to the grid.
    #[error("Duplicate hex cell identifier: {cell_id}")]
    DuplicateCell { cell_id: String },

    /// Hex grid resolution outside the supported range.
    #[error("Invalid grid resolution: {resolution}")]
    InvalidResolution { resolution: u8 },

    /// Result store failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Feature (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or unparsable configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl GridError {
    /// Shorthand for [`GridError::InvalidGeometry`].
    pub fn invalid_geometry(message: impl Into<String>) -> Self {
        GridError::InvalidGeometry {
            message: message.into(),
        }
    }

    /// Shorthand for [`GridError::InvalidProperty`].
    pub fn invalid_property(message: impl Into<String>) -> Self {
        GridError::InvalidProperty {
            message: message.into(),
        }
    }

    /// Shorthand for [`GridError::MalformedRaster`].
    pub fn malformed(message: impl Into<String>) -> Self {
        GridError::MalformedRaster {
            message: message.into(),
        }
    }

    /// Whether the error was caused by caller input rather than by the system.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            GridError::InvalidGeometry { .. } | GridError::SizeRestriction { .. }
        )
    }
}

/// Result type alias using [`GridError`].
pub type Result<T> = std::result::Result<T, GridError>;
