//! Geographic extents.
//!
//! [`BoundingBox`] is the unit of tile addressing and the carrier of the
//! global-domain guard used before any raster clip.

use geo::{BoundingRect, MultiPolygon, Polygon, Rect};
use rstar::AABB;

/// Widest longitude span a clip extent may have.
pub const MAX_LON_SPAN: f64 = 180.0;

/// Tallest latitude span a clip extent may have.
pub const MAX_LAT_SPAN: f64 = 90.0;

/// A geographic bounding box.
///
/// Coordinates are in decimal degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Minimum latitude (southern boundary).
    pub min_lat: f64,
    /// Minimum longitude (western boundary).
    pub min_lon: f64,
    /// Maximum latitude (northern boundary).
    pub max_lat: f64,
    /// Maximum longitude (eastern boundary).
    pub max_lon: f64,
}

impl BoundingBox {
    /// Create a new bounding box.
    ///
    /// # Arguments
    ///
    /// * `min_lat` - Southern boundary latitude
    /// * `min_lon` - Western boundary longitude
    /// * `max_lat` - Northern boundary latitude
    /// * `max_lon` - Eastern boundary longitude
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Build from a `geo` rectangle (x = longitude, y = latitude).
    pub fn from_rect(rect: Rect<f64>) -> Self {
        Self::new(rect.min().y, rect.min().x, rect.max().y, rect.max().x)
    }

    /// Extent of a polygon, or `None` for an empty one.
    pub fn of_polygon(polygon: &Polygon<f64>) -> Option<Self> {
        polygon.bounding_rect().map(Self::from_rect)
    }

    /// Extent of a multi-polygon, or `None` for an empty one.
    pub fn of_multi_polygon(polygons: &MultiPolygon<f64>) -> Option<Self> {
        polygons.bounding_rect().map(Self::from_rect)
    }

    /// Longitude span in degrees.
    pub fn lon_span(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    /// Latitude span in degrees.
    pub fn lat_span(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Check whether two boxes share interior area.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.min_lat < other.max_lat
            && self.max_lat > other.min_lat
            && self.min_lon < other.max_lon
            && self.max_lon > other.min_lon
    }

    /// Intersection of two boxes, if they overlap.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.overlaps(other) {
            return None;
        }
        Some(BoundingBox::new(
            self.min_lat.max(other.min_lat),
            self.min_lon.max(other.min_lon),
            self.max_lat.min(other.max_lat),
            self.max_lon.min(other.max_lon),
        ))
    }

    /// Whether a raster may be clipped to this extent.
    ///
    /// The extent must lie inside ±180° longitude / ±90° latitude and span at
    /// most 180° of longitude and 90° of latitude. Cells split at the
    /// antimeridian or capped at a pole fail the span test.
    pub fn within_global_domain(&self) -> bool {
        let finite = self.min_lat.is_finite()
            && self.min_lon.is_finite()
            && self.max_lat.is_finite()
            && self.max_lon.is_finite();

        finite
            && self.lon_span() <= MAX_LON_SPAN
            && self.lat_span() <= MAX_LAT_SPAN
            && self.min_lon >= -180.0
            && self.max_lon <= 180.0
            && self.min_lat >= -90.0
            && self.max_lat <= 90.0
    }

    /// Envelope used by the R-tree indexes (`[lon, lat]` corners).
    pub fn to_aabb(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.min_lon, self.min_lat], [self.max_lon, self.max_lat])
    }
}
