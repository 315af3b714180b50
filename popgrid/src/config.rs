//! Runtime settings shared by the service and the CLI.

use std::path::{Path, PathBuf};

use crate::error::{GridError, Result};
use crate::query::DEFAULT_GEOM_SIZE_LIMIT;

/// Default raster tile size in pixels.
pub const DEFAULT_TILE_SIZE: usize = 100;
/// Default hex grid resolution.
pub const DEFAULT_H3_RESOLUTION: u8 = 4;
/// Default result cache capacity.
pub const DEFAULT_CACHE_SIZE: u64 = 1000;
/// Default service port.
pub const DEFAULT_PORT: u16 = 8080;

/// Settings for a popgrid deployment.
///
/// # Example
///
/// ```ignore
/// use popgrid::config::Settings;
///
/// let settings = Settings::new("/data/popgrid")
///     .tile_size(200)
///     .h3_resolution(5);
/// assert_eq!(settings.db_path(), std::path::Path::new("/data/popgrid/results.db"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    data_dir: PathBuf,
    db_path: Option<PathBuf>,
    raster: Option<PathBuf>,
    regions: Option<PathBuf>,
    hdi: Option<PathBuf>,
    tile_size: usize,
    h3_resolution: u8,
    cache_size: u64,
    geom_size_limit: f64,
    port: u16,
}

impl Settings {
    /// Settings with defaults rooted at `data_dir`.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            db_path: None,
            raster: None,
            regions: None,
            hdi: None,
            tile_size: DEFAULT_TILE_SIZE,
            h3_resolution: DEFAULT_H3_RESOLUTION,
            cache_size: DEFAULT_CACHE_SIZE,
            geom_size_limit: DEFAULT_GEOM_SIZE_LIMIT,
            port: DEFAULT_PORT,
        }
    }

    /// Settings read from environment variables.
    ///
    /// # Environment Variables
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `POPGRID_DATA_DIR` | Raster sources and results database | Required |
    /// | `POPGRID_DB_PATH` | SQLite results database | `<data_dir>/results.db` |
    /// | `POPGRID_RASTER` | Raster ingested at startup | None |
    /// | `POPGRID_REGIONS` | Regions GeoJSON | None |
    /// | `POPGRID_HDI` | HDI GeoJSON | None |
    /// | `POPGRID_TILE_SIZE` | Raster tile size in pixels | 100 |
    /// | `POPGRID_H3_RESOLUTION` | Hex grid resolution | 4 |
    /// | `POPGRID_CACHE_SIZE` | Result cache capacity | 1000 |
    /// | `POPGRID_GEOM_SIZE_LIMIT` | Maximum query area in km² | 1000000 |
    /// | `POPGRID_PORT` | Service port | 8080 |
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Config`] if `POPGRID_DATA_DIR` is not set or a
    /// numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Settings read through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("POPGRID_DATA_DIR").ok_or_else(|| GridError::Config {
            message: "POPGRID_DATA_DIR environment variable not set".to_string(),
        })?;
        let path = |name: &str| lookup(name).map(PathBuf::from);

        let mut settings = Self::new(data_dir);
        settings.db_path = path("POPGRID_DB_PATH");
        settings.raster = path("POPGRID_RASTER");
        settings.regions = path("POPGRID_REGIONS");
        settings.hdi = path("POPGRID_HDI");

        if let Some(v) = parse_var(&lookup, "POPGRID_TILE_SIZE")? {
            settings.tile_size = v;
        }
        if let Some(v) = parse_var(&lookup, "POPGRID_H3_RESOLUTION")? {
            settings.h3_resolution = v;
        }
        if let Some(v) = parse_var(&lookup, "POPGRID_CACHE_SIZE")? {
            settings.cache_size = v;
        }
        if let Some(v) = parse_var(&lookup, "POPGRID_GEOM_SIZE_LIMIT")? {
            settings.geom_size_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "POPGRID_PORT")? {
            settings.port = v;
        }
        Ok(settings)
    }

    pub fn with_db_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.db_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn raster<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.raster = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn regions<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.regions = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn hdi<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.hdi = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn tile_size(mut self, size: usize) -> Self {
        self.tile_size = size;
        self
    }

    pub fn h3_resolution(mut self, resolution: u8) -> Self {
        self.h3_resolution = resolution;
        self
    }

    pub fn cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    pub fn geom_size_limit(mut self, limit_sqkm: f64) -> Self {
        self.geom_size_limit = limit_sqkm;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Results database path, `<data_dir>/results.db` unless overridden.
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("results.db"))
    }

    pub fn raster_path(&self) -> Option<&Path> {
        self.raster.as_deref()
    }

    pub fn regions_path(&self) -> Option<&Path> {
        self.regions.as_deref()
    }

    pub fn hdi_path(&self) -> Option<&Path> {
        self.hdi.as_deref()
    }

    pub fn tile_size_px(&self) -> usize {
        self.tile_size
    }

    pub fn resolution(&self) -> u8 {
        self.h3_resolution
    }

    pub fn cache_capacity(&self) -> u64 {
        self.cache_size
    }

    pub fn size_limit_sqkm(&self) -> f64 {
        self.geom_size_limit
    }

    pub fn listen_port(&self) -> u16 {
        self.port
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| GridError::Config {
            message: format!("{name} has invalid value '{raw}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&[("POPGRID_DATA_DIR", "/data")])).unwrap();
        assert_eq!(settings.data_dir(), Path::new("/data"));
        assert_eq!(settings.db_path(), PathBuf::from("/data/results.db"));
        assert_eq!(settings.tile_size_px(), 100);
        assert_eq!(settings.resolution(), 4);
        assert_eq!(settings.cache_capacity(), 1000);
        assert_eq!(settings.size_limit_sqkm(), 1_000_000.0);
        assert_eq!(settings.listen_port(), 8080);
        assert!(settings.raster_path().is_none());
    }

    #[test]
    fn test_missing_data_dir() {
        let result = Settings::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(GridError::Config { .. })));
    }

    #[test]
    fn test_values() {
        let settings = Settings::from_lookup(lookup(&[
            ("POPGRID_DATA_DIR", "/data"),
            ("POPGRID_DB_PATH", "/tmp/r.db"),
            ("POPGRID_RASTER", "/data/ghs_pop.zip"),
            ("POPGRID_TILE_SIZE", "250"),
            ("POPGRID_H3_RESOLUTION", "6"),
            ("POPGRID_GEOM_SIZE_LIMIT", "500.5"),
        ]))
        .unwrap();
        assert_eq!(settings.db_path(), PathBuf::from("/tmp/r.db"));
        assert_eq!(settings.raster_path(), Some(Path::new("/data/ghs_pop.zip")));
        assert_eq!(settings.tile_size_px(), 250);
        assert_eq!(settings.resolution(), 6);
        assert_eq!(settings.size_limit_sqkm(), 500.5);
    }

    #[test]
    fn test_invalid_number() {
        let result = Settings::from_lookup(lookup(&[
            ("POPGRID_DATA_DIR", "/data"),
            ("POPGRID_PORT", "eighty"),
        ]));
        assert!(matches!(result, Err(GridError::Config { .. })));
    }

    #[test]
    fn test_builder() {
        let settings = Settings::new("/data").tile_size(50).port(9000).regions("/r.geojson");
        assert_eq!(settings.tile_size_px(), 50);
        assert_eq!(settings.listen_port(), 9000);
        assert_eq!(settings.regions_path(), Some(Path::new("/r.geojson")));
    }
}
