//! Bulk import of regions and HDI source data from GeoJSON.
//!
//! Both loaders take a `FeatureCollection` with polygonal geometries.
//! Regions read `name`, `country` and `shdi` properties and take their id
//! from the feature id or an `id` property. HDI records need `country` and a
//! numeric `shdi`.

use std::fs;
use std::path::Path;

use geojson::{feature::Id, Feature, FeatureCollection, GeoJson, JsonValue};

use crate::error::{GridError, Result};
use crate::query::parse_polygon;
use crate::region::{HdiRecord, HdiTable, Region};

fn read_collection(text: &str) -> Result<FeatureCollection> {
    let geojson: GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| GridError::invalid_geometry(e.to_string()))?;
    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        _ => Err(GridError::invalid_geometry("expected a FeatureCollection")),
    }
}

fn string_property(feature: &Feature, name: &str) -> Option<String> {
    match feature.property(name)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn feature_id(feature: &Feature, index: usize) -> String {
    match &feature.id {
        Some(Id::String(s)) => s.clone(),
        Some(Id::Number(n)) => n.to_string(),
        None => string_property(feature, "id").unwrap_or_else(|| (index + 1).to_string()),
    }
}

fn feature_geometry(feature: &Feature, index: usize) -> Result<geo::MultiPolygon<f64>> {
    let geometry = feature
        .geometry
        .as_ref()
        .ok_or_else(|| GridError::invalid_geometry(format!("feature {index} has no geometry")))?;
    parse_polygon(geometry)
}

/// Parse regions from a GeoJSON `FeatureCollection`.
///
/// Features without an id get their 1-based position. A region without a
/// `name` property is rejected.
pub fn regions_from_geojson(text: &str) -> Result<Vec<Region>> {
    let fc = read_collection(text)?;
    let regions = fc
        .features
        .iter()
        .enumerate()
        .map(|(i, feature)| {
            let name = string_property(feature, "name").ok_or_else(|| {
                GridError::invalid_property(format!("region feature {i} has no name"))
            })?;
            let mut region = Region::new(
                feature_id(feature, i),
                name,
                string_property(feature, "country"),
                feature_geometry(feature, i)?,
            );
            region.shdi = feature.property("shdi").and_then(JsonValue::as_f64);
            Ok(region)
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::info!(regions = regions.len(), "Regions imported");
    Ok(regions)
}

/// Parse HDI records from a GeoJSON `FeatureCollection`.
pub fn hdi_from_geojson(text: &str) -> Result<Vec<HdiRecord>> {
    let fc = read_collection(text)?;
    let records = fc
        .features
        .iter()
        .enumerate()
        .map(|(i, feature)| {
            let country = string_property(feature, "country").ok_or_else(|| {
                GridError::invalid_property(format!("HDI feature {i} has no country"))
            })?;
            let shdi = feature
                .property("shdi")
                .and_then(JsonValue::as_f64)
                .ok_or_else(|| {
                    GridError::invalid_property(format!("HDI feature {i} has no numeric shdi"))
                })?;
            Ok(HdiRecord {
                geometry: feature_geometry(feature, i)?,
                country,
                shdi,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::info!(records = records.len(), "HDI records imported");
    Ok(records)
}

/// Read and index an HDI GeoJSON file.
pub fn load_hdi_table<P: AsRef<Path>>(path: P) -> Result<HdiTable> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(GridError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let text = fs::read_to_string(path)?;
    Ok(HdiTable::new(hdi_from_geojson(&text)?))
}

/// Read a regions GeoJSON file.
pub fn load_regions<P: AsRef<Path>>(path: P) -> Result<Vec<Region>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(GridError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let text = fs::read_to_string(path)?;
    regions_from_geojson(&text)
}
