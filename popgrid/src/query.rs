//! GeoJSON query surface.
//!
//! Parses caller polygons, enforces the size restriction and renders hex
//! cells and regions as GeoJSON `FeatureCollection`s. Output coordinates are
//! lon/lat rounded to six decimals; properties whose value is null are left
//! out.
//!
//! # Example
//!
//! ```ignore
//! use popgrid::query::{cells_as_feature_collection, check_size, parse_geojson};
//!
//! let area = parse_geojson(r#"{"type": "Polygon", "coordinates": [[[8.6, 49.3], [8.8, 49.3], [8.8, 49.5], [8.6, 49.3]]]}"#)?;
//! check_size(&area, 1_000_000.0)?;
//! let fc = cells_as_feature_collection(&grid, &area);
//! println!("{}", fc);
//! ```

use geo::{Coord, GeodesicArea, LineString, MultiPolygon, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue, Value};
use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};
use crate::grid::{HexCell, HexGrid};
use crate::region::{summarize_region, Region};

/// Default maximum query polygon area in km².
pub const DEFAULT_GEOM_SIZE_LIMIT: f64 = 1_000_000.0;

/// Decimal places kept in output coordinates.
pub const COORD_PRECISION: i32 = 6;

/// Geodesic area of a polygon in km².
pub fn area_sqkm(area: &MultiPolygon<f64>) -> f64 {
    area.geodesic_area_unsigned() / 1_000_000.0
}

/// Reject polygons larger than `limit_sqkm`. Returns the area on success.
///
/// # Errors
///
/// Returns [`GridError::SizeRestriction`] if the area exceeds the limit.
pub fn check_size(area: &MultiPolygon<f64>, limit_sqkm: f64) -> Result<f64> {
    let area_sqkm = area_sqkm(area);
    if area_sqkm > limit_sqkm {
        return Err(GridError::SizeRestriction {
            area_sqkm,
            limit_sqkm,
        });
    }
    Ok(area_sqkm)
}

/// Convert a GeoJSON `Polygon` or `MultiPolygon` to a lon/lat multipolygon.
///
/// Any third coordinate is dropped.
///
/// # Errors
///
/// Returns [`GridError::InvalidGeometry`] for other geometry types, rings
/// that are not closed or have fewer than four positions, and coordinates
/// that are not finite or fall outside ±180° / ±90°.
pub fn parse_polygon(geometry: &Geometry) -> Result<MultiPolygon<f64>> {
    match &geometry.value {
        Value::Polygon(rings) => Ok(MultiPolygon::new(vec![polygon_from_rings(rings)?])),
        Value::MultiPolygon(polygons) => polygons
            .iter()
            .map(|rings| polygon_from_rings(rings))
            .collect::<Result<Vec<_>>>()
            .map(MultiPolygon::new),
        other => Err(GridError::invalid_geometry(format!(
            "expected Polygon or MultiPolygon, got {}",
            geometry_type(other)
        ))),
    }
}

/// Parse a GeoJSON document into a multipolygon.
///
/// Accepts a bare geometry, a feature, or a feature collection whose
/// features are all polygonal.
pub fn parse_geojson(text: &str) -> Result<MultiPolygon<f64>> {
    let geojson: GeoJson = text
        .parse()
        .map_err(|e: geojson::Error| GridError::invalid_geometry(e.to_string()))?;

    match geojson {
        GeoJson::Geometry(geometry) => parse_polygon(&geometry),
        GeoJson::Feature(feature) => feature_polygon(&feature),
        GeoJson::FeatureCollection(fc) => {
            let mut polygons = Vec::new();
            for feature in &fc.features {
                polygons.extend(feature_polygon(feature)?.0);
            }
            if polygons.is_empty() {
                return Err(GridError::invalid_geometry("feature collection is empty"));
            }
            Ok(MultiPolygon::new(polygons))
        }
    }
}

fn geometry_type(value: &Value) -> &'static str {
    match value {
        Value::Point(_) => "Point",
        Value::MultiPoint(_) => "MultiPoint",
        Value::LineString(_) => "LineString",
        Value::MultiLineString(_) => "MultiLineString",
        Value::Polygon(_) => "Polygon",
        Value::MultiPolygon(_) => "MultiPolygon",
        Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn feature_polygon(feature: &Feature) -> Result<MultiPolygon<f64>> {
    let geometry = feature
        .geometry
        .as_ref()
        .ok_or_else(|| GridError::invalid_geometry("feature has no geometry"))?;
    parse_polygon(geometry)
}

fn polygon_from_rings(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>> {
    let mut rings = rings.iter().map(|ring| ring_from_positions(ring));
    let exterior = rings
        .next()
        .ok_or_else(|| GridError::invalid_geometry("polygon has no rings"))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn ring_from_positions(positions: &[Vec<f64>]) -> Result<LineString<f64>> {
    if positions.len() < 4 {
        return Err(GridError::invalid_geometry(format!(
            "ring needs at least 4 positions, got {}",
            positions.len()
        )));
    }

    let coords = positions
        .iter()
        .map(|p| coord_from_position(p))
        .collect::<Result<Vec<_>>>()?;

    if coords.first() != coords.last() {
        return Err(GridError::invalid_geometry("ring is not closed"));
    }
    Ok(LineString::new(coords))
}

fn coord_from_position(position: &[f64]) -> Result<Coord<f64>> {
    let (lon, lat) = match position {
        [lon, lat, ..] => (*lon, *lat),
        _ => {
            return Err(GridError::invalid_geometry(
                "position must have at least 2 elements (lon, lat)",
            ))
        }
    };

    if !lon.is_finite() || !lat.is_finite() {
        return Err(GridError::invalid_geometry("position is not finite"));
    }
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(GridError::invalid_geometry(format!(
            "position ({lon}, {lat}) is outside lon/lat bounds"
        )));
    }
    Ok(Coord { x: lon, y: lat })
}

fn round_coord(value: f64) -> f64 {
    let factor = 10f64.powi(COORD_PRECISION);
    (value * factor).round() / factor
}

fn ring_positions(ring: &LineString<f64>) -> Vec<Vec<f64>> {
    ring.coords()
        .map(|c| vec![round_coord(c.x), round_coord(c.y)])
        .collect()
}

fn polygon_rings(polygon: &Polygon<f64>) -> Vec<Vec<Vec<f64>>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(ring_positions)
        .collect()
}

/// Drop null-valued entries.
fn strip_nulls(properties: JsonObject) -> JsonObject {
    properties.into_iter().filter(|(_, v)| !v.is_null()).collect()
}

fn feature(value: Value, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: Some(strip_nulls(properties)),
        foreign_members: None,
    }
}

/// GeoJSON feature for one hex cell with `cell_id` and `tile_id` properties.
///
/// A cell split at the antimeridian is written as a `MultiPolygon`.
pub fn cell_feature(cell: &HexCell) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("cell_id".to_string(), JsonValue::from(cell.cell_id()));
    properties.insert("tile_id".to_string(), JsonValue::from(cell.tile_id()));

    let value = match cell.geometry().0.as_slice() {
        [outline] => Value::Polygon(polygon_rings(outline)),
        pieces => Value::MultiPolygon(pieces.iter().map(polygon_rings).collect()),
    };
    feature(value, properties)
}

/// Every hex cell intersecting `area`, in grid storage order.
pub fn cells_as_feature_collection(grid: &HexGrid, area: &MultiPolygon<f64>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: grid.cells_intersecting(area).map(cell_feature).collect(),
        foreign_members: None,
    }
}

/// GeoJSON feature for one region.
pub fn region_feature(region: &Region) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("id".to_string(), JsonValue::from(region.region_id.as_str()));
    properties.insert("name".to_string(), JsonValue::from(region.name.as_str()));
    properties.insert("country".to_string(), JsonValue::from(region.country.as_deref()));
    properties.insert("shdi".to_string(), JsonValue::from(region.shdi));

    let polygons = region.geometry.iter().map(polygon_rings).collect();
    feature(Value::MultiPolygon(polygons), properties)
}

/// Region feature extended with the population of its hex cells and its
/// geodesic `area_sqkm`. `population` is left out while no cell inside the
/// region has one.
pub fn region_summary_feature(grid: &HexGrid, region: &Region) -> Feature {
    let summary = summarize_region(grid, region);
    let mut feature = region_feature(region);
    if let Some(properties) = feature.properties.as_mut() {
        if let Some(population) = summary.population {
            properties.insert("population".to_string(), JsonValue::from(population));
        }
        properties.insert("area_sqkm".to_string(), JsonValue::from(summary.area_sqkm));
    }
    feature
}

/// All regions as one feature collection.
pub fn regions_as_feature_collection(regions: &[Region]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: regions.iter().map(region_feature).collect(),
        foreign_members: None,
    }
}

/// Catalogue entry for a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub id: String,
    pub name: String,
}

/// List regions as `{id, name}` pairs.
pub fn region_catalogue(regions: &[Region]) -> Vec<RegionEntry> {
    regions
        .iter()
        .map(|r| RegionEntry {
            id: r.region_id.clone(),
            name: r.name.clone(),
        })
        .collect()
}

/// Look up a region by identifier.
pub fn find_region<'a>(regions: &'a [Region], region_id: &str) -> Option<&'a Region> {
    regions.iter().find(|r| r.region_id == region_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate_population;
    use crate::grid::tests::{square_area, square_cell};
    use crate::store::RasterStore;
    use crate::tile::RasterTile;
    use geo::polygon;

    fn heidelberg() -> Geometry {
        r#"{
            "type": "Polygon",
            "coordinates": [[[8.6, 49.3], [8.8, 49.3], [8.8, 49.5], [8.6, 49.5], [8.6, 49.3]]]
        }"#
        .parse()
        .unwrap()
    }

    #[test]
    fn test_area_sqkm() {
        // One degree square at the equator
        let area = area_sqkm(&square_area(0.0, 0.0, 1.0));
        assert!((12_200.0..12_400.0).contains(&area), "{area}");
    }

    #[test]
    fn test_check_size() {
        let small = square_area(0.0, 0.0, 1.0);
        assert!(check_size(&small, DEFAULT_GEOM_SIZE_LIMIT).is_ok());

        let huge = square_area(0.0, 0.0, 20.0);
        let err = check_size(&huge, DEFAULT_GEOM_SIZE_LIMIT).unwrap_err();
        assert!(matches!(err, GridError::SizeRestriction { .. }));
        assert!(err.is_bad_request());
    }

    #[test]
    fn test_parse_polygon() {
        let area = parse_polygon(&heidelberg()).unwrap();
        assert_eq!(area.0.len(), 1);
        assert_eq!(area.0[0].exterior().0.len(), 5);
    }

    #[test]
    fn test_parse_polygon_drops_third_coordinate() {
        let geometry: Geometry = r#"{
            "type": "Polygon",
            "coordinates": [[[0, 0, 5], [1, 0, 5], [1, 1, 5], [0, 0, 5]]]
        }"#
        .parse()
        .unwrap();
        let area = parse_polygon(&geometry).unwrap();
        assert_eq!(area.0[0].exterior().0[1], Coord { x: 1.0, y: 0.0 });
    }

    #[test]
    fn test_parse_polygon_rejects_bad_input() {
        let point = Geometry::new(Value::Point(vec![8.6, 49.3]));
        assert!(matches!(parse_polygon(&point), Err(GridError::InvalidGeometry { .. })));

        let open = Geometry::new(Value::Polygon(vec![vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
            vec![0.0, 1.0],
        ]]));
        assert!(parse_polygon(&open).is_err());

        let short = Geometry::new(Value::Polygon(vec![vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 0.0],
        ]]));
        assert!(parse_polygon(&short).is_err());

        let projected = Geometry::new(Value::Polygon(vec![vec![
            vec![950_000.0, 6_300_000.0],
            vec![960_000.0, 6_300_000.0],
            vec![960_000.0, 6_310_000.0],
            vec![950_000.0, 6_300_000.0],
        ]]));
        assert!(parse_polygon(&projected).is_err());
    }

    #[test]
    fn test_parse_geojson_feature_collection() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}},
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "Polygon", "coordinates": [[[2, 0], [3, 0], [3, 1], [2, 0]]]}}
            ]
        }"#;
        assert_eq!(parse_geojson(text).unwrap().0.len(), 2);
        assert!(parse_geojson("not json").is_err());
    }

    #[test]
    fn test_cells_as_feature_collection() {
        let grid = HexGrid::from_cells(vec![
            HexCell::new(
                "a",
                polygon![
                    (x: 0.12345678, y: 0.0),
                    (x: 1.0, y: 0.0),
                    (x: 1.0, y: 1.0),
                    (x: 0.12345678, y: 0.0),
                ],
                Some("7".to_string()),
            ),
            square_cell("b", 1.0, 0.0, 1.0),
            square_cell("c", 5.0, 5.0, 1.0),
        ])
        .unwrap();

        let fc = cells_as_feature_collection(&grid, &square_area(0.5, 0.1, 1.0));
        assert_eq!(fc.features.len(), 2);

        let a = &fc.features[0];
        let props = a.properties.as_ref().unwrap();
        assert_eq!(props["cell_id"], "a");
        assert_eq!(props["tile_id"], "7");
        match &a.geometry.as_ref().unwrap().value {
            Value::Polygon(rings) => assert_eq!(rings[0][0], vec![0.123457, 0.0]),
            other => panic!("unexpected geometry {other:?}"),
        }

        // Null tile_id is stripped
        let b = fc.features[1].properties.as_ref().unwrap();
        assert_eq!(b["cell_id"], "b");
        assert!(!b.contains_key("tile_id"));
    }

    #[test]
    fn test_split_cell_feature_is_multi_polygon() {
        let west = square_cell("w", 179.0, 10.0, 1.0).geometry().0[0].clone();
        let east = square_cell("e", -180.0, 10.0, 1.0).geometry().0[0].clone();
        let cell = HexCell::new("split", MultiPolygon::new(vec![west, east]), None);

        let feature = cell_feature(&cell);
        match &feature.geometry.as_ref().unwrap().value {
            Value::MultiPolygon(polygons) => {
                assert_eq!(polygons.len(), 2);
                assert_eq!(polygons[1][0][0], vec![-180.0, 10.0]);
            }
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn test_cells_as_feature_collection_serializes() {
        let grid = HexGrid::from_cells(vec![square_cell("a", 0.0, 0.0, 1.0)]).unwrap();
        let fc = cells_as_feature_collection(&grid, &square_area(0.2, 0.2, 0.2));

        let json: serde_json::Value = serde_json::to_value(&fc).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["features"][0]["type"], "Feature");
        assert_eq!(json["features"][0]["geometry"]["type"], "Polygon");
    }

    #[test]
    fn test_region_summary_feature() {
        let grid = HexGrid::from_cells(vec![
            square_cell("a", 0.0, 0.0, 1.0),
            square_cell("b", 1.0, 0.0, 1.0),
            square_cell("c", 5.0, 5.0, 1.0),
        ])
        .unwrap();
        // One row of pixels under a and b
        let store = RasterStore::new();
        store
            .replace_tiles(vec![RasterTile::new(0, 0.0, 1.0, 1.0, 2, 1, vec![4.0, 6.0]).unwrap()])
            .unwrap();
        aggregate_population(&grid, &store);

        let region = Region::new("r", "R", None, square_area(0.0, 0.0, 2.0));
        let feature = region_summary_feature(&grid, &region);
        let props = feature.properties.as_ref().unwrap();
        assert_eq!(props["population"], 10.0);
        assert!(props["area_sqkm"].as_f64().unwrap() > 20_000.0);

        // No populated cell inside: population is left out, area is kept
        let empty = Region::new("e", "E", None, square_area(30.0, 30.0, 1.0));
        let feature = region_summary_feature(&grid, &empty);
        let props = feature.properties.as_ref().unwrap();
        assert!(!props.contains_key("population"));
        assert!(props.contains_key("area_sqkm"));
    }

    #[test]
    fn test_region_catalogue_and_features() {
        let mut berlin = Region::new("2", "Berlin", Some("Germany".into()), square_area(13.0, 52.0, 1.0));
        berlin.shdi = Some(0.95);
        let regions = vec![
            Region::new("1", "Somewhere", None, square_area(0.0, 0.0, 1.0)),
            berlin,
        ];

        let catalogue = region_catalogue(&regions);
        assert_eq!(
            catalogue[1],
            RegionEntry {
                id: "2".into(),
                name: "Berlin".into()
            }
        );

        let fc = regions_as_feature_collection(&regions);
        let first = fc.features[0].properties.as_ref().unwrap();
        assert!(!first.contains_key("country"));
        assert!(!first.contains_key("shdi"));
        let second = fc.features[1].properties.as_ref().unwrap();
        assert_eq!(second["shdi"], 0.95);

        assert_eq!(find_region(&regions, "2").unwrap().name, "Berlin");
        assert!(find_region(&regions, "9").is_none());
    }
}
