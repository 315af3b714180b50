//! Region-to-HDI resolution.
//!
//! Every [`Region`] is classified once as a country or a sub-national region
//! ([`RegionKind`]) and resolved with the rule for its kind:
//!
//! - **Country** (`name == country`): unweighted mean of the SHDI of every
//!   HDI record of that country.
//! - **Sub-national**: SHDI of the HDI record with the largest intersection
//!   area. Exact ties go to the record stored first.
//!
//! A region without matching HDI data resolves to `None`. Regions that cut
//! across several sub-national units or countries get whichever single unit
//! wins the rule above; no multi-unit weighting is attempted.

use std::collections::HashMap;

use geo::{Area, BooleanOps, Contains, Intersects, MultiPolygon};
use rayon::prelude::*;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;

use crate::extent::BoundingBox;
use crate::grid::HexGrid;
use crate::query::area_sqkm;

type RecordEntry = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// A region of interest: a test region, a country, or a user boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub region_id: String,
    pub geometry: MultiPolygon<f64>,
    pub name: String,
    pub country: Option<String>,
    pub shdi: Option<f64>,
}

impl Region {
    /// Create a region with an unresolved SHDI.
    pub fn new(
        region_id: impl Into<String>,
        name: impl Into<String>,
        country: Option<String>,
        geometry: MultiPolygon<f64>,
    ) -> Self {
        Self {
            region_id: region_id.into(),
            geometry,
            name: name.into(),
            country,
            shdi: None,
        }
    }

    /// Returns the resolution rule this region falls under.
    pub fn kind(&self) -> RegionKind<'_> {
        match &self.country {
            Some(country) if *country == self.name => RegionKind::Country { country },
            _ => RegionKind::Subnational,
        }
    }
}

/// Which resolution rule applies to a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind<'a> {
    /// The region is a whole country.
    Country { country: &'a str },
    /// Anything else.
    Subnational,
}

/// A sub-national statistical unit with its own HDI value.
#[derive(Debug, Clone, PartialEq)]
pub struct HdiRecord {
    pub geometry: MultiPolygon<f64>,
    pub country: String,
    pub shdi: f64,
}

/// Indexed HDI source table.
pub struct HdiTable {
    records: Vec<HdiRecord>,
    index: RTree<RecordEntry>,
    by_country: HashMap<String, Vec<usize>>,
}

impl HdiTable {
    /// Index a set of records. Storage order is the given order.
    pub fn new(records: Vec<HdiRecord>) -> Self {
        let entries = records
            .iter()
            .enumerate()
            .filter_map(|(i, record)| {
                let e = BoundingBox::of_multi_polygon(&record.geometry)?;
                Some(GeomWithData::new(
                    Rectangle::from_corners([e.min_lon, e.min_lat], [e.max_lon, e.max_lat]),
                    i,
                ))
            })
            .collect();

        let mut by_country: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            by_country.entry(record.country.clone()).or_default().push(i);
        }

        Self {
            records,
            index: RTree::bulk_load(entries),
            by_country,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in storage order.
    pub fn records(&self) -> &[HdiRecord] {
        &self.records
    }

    /// Indices of the records whose geometry intersects `area`, ascending.
    pub fn intersecting(&self, area: &MultiPolygon<f64>) -> Vec<usize> {
        let bbox = match BoundingBox::of_multi_polygon(area) {
            Some(b) => b,
            None => return Vec::new(),
        };
        let mut found: Vec<usize> = self
            .index
            .locate_in_envelope_intersecting(&bbox.to_aabb())
            .map(|entry| entry.data)
            .filter(|&i| self.records[i].geometry.intersects(area))
            .collect();
        found.sort_unstable();
        found
    }

    /// The intersecting record sharing the most area with `area`.
    pub fn largest_intersection(&self, area: &MultiPolygon<f64>) -> Option<&HdiRecord> {
        let mut best: Option<(usize, f64)> = None;
        for i in self.intersecting(area) {
            let shared = self.records[i].geometry.intersection(area).unsigned_area();
            match best {
                Some((_, best_area)) if shared <= best_area => {}
                _ => best = Some((i, shared)),
            }
        }
        best.map(|(i, _)| &self.records[i])
    }

    /// Unweighted mean SHDI of every record of `country`.
    pub fn country_mean(&self, country: &str) -> Option<f64> {
        let indices = self.by_country.get(country)?;
        if indices.is_empty() {
            return None;
        }
        let sum: f64 = indices.iter().map(|&i| self.records[i].shdi).sum();
        Some(sum / indices.len() as f64)
    }
}

/// Statistics from a resolution run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveStats {
    pub regions_total: u64,
    pub countries_resolved: u64,
    pub subnational_resolved: u64,
    /// Regions left without an SHDI for lack of source coverage.
    pub unresolved: u64,
}

/// Resolve the SHDI of one region.
pub fn resolve_shdi(region: &Region, table: &HdiTable) -> Option<f64> {
    match region.kind() {
        RegionKind::Country { country } => table.country_mean(country),
        RegionKind::Subnational => table
            .largest_intersection(&region.geometry)
            .map(|record| record.shdi),
    }
}

/// Resolve and assign the SHDI of every region.
pub fn resolve_all(regions: &mut [Region], table: &HdiTable) -> ResolveStats {
    regions.par_iter_mut().for_each(|region| {
        region.shdi = resolve_shdi(region, table);
    });

    let mut stats = ResolveStats {
        regions_total: regions.len() as u64,
        ..Default::default()
    };
    for region in regions.iter() {
        match (region.kind(), region.shdi) {
            (_, None) => stats.unresolved += 1,
            (RegionKind::Country { .. }, Some(_)) => stats.countries_resolved += 1,
            (RegionKind::Subnational, Some(_)) => stats.subnational_resolved += 1,
        }
    }

    tracing::info!(
        regions_total = stats.regions_total,
        countries_resolved = stats.countries_resolved,
        subnational_resolved = stats.subnational_resolved,
        unresolved = stats.unresolved,
        "SHDI resolution complete"
    );
    stats
}

/// Aggregated figures for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSummary {
    pub region_id: String,
    pub shdi: Option<f64>,
    /// Sum over the hex cells whose centroid lies inside the region.
    pub population: Option<f64>,
    pub area_sqkm: f64,
}

/// Combine a region with the aggregated hex-cell population.
///
/// A cell counts toward the region when its centroid lies inside it, so
/// neighbouring regions never share a cell.
pub fn summarize_region(grid: &HexGrid, region: &Region) -> RegionSummary {
    let populations = grid.populations();
    let mut population = None;

    for cell in grid.cells_intersecting(&region.geometry) {
        let inside = cell
            .centroid()
            .is_some_and(|c| region.geometry.contains(&c));
        if !inside {
            continue;
        }
        // Populations are indexed by storage position
        let value = grid
            .position(cell.cell_id())
            .and_then(|i| populations.get(i).copied().flatten());
        if let Some(v) = value {
            *population.get_or_insert(0.0) += v;
        }
    }

    RegionSummary {
        region_id: region.region_id.clone(),
        shdi: region.shdi,
        population,
        area_sqkm: area_sqkm(&region.geometry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::tests::{square_area, square_cell};

    fn record(country: &str, shdi: f64, area: MultiPolygon<f64>) -> HdiRecord {
        HdiRecord {
            geometry: area,
            country: country.to_string(),
            shdi,
        }
    }

    #[test]
    fn test_region_kind() {
        let country = Region::new("1", "Germany", Some("Germany".into()), square_area(0.0, 0.0, 1.0));
        assert_eq!(country.kind(), RegionKind::Country { country: "Germany" });

        let city = Region::new("3", "Heidelberg", Some("Germany".into()), square_area(0.0, 0.0, 1.0));
        assert_eq!(city.kind(), RegionKind::Subnational);

        let unknown = Region::new("4", "Somewhere", None, square_area(0.0, 0.0, 1.0));
        assert_eq!(unknown.kind(), RegionKind::Subnational);
    }

    #[test]
    fn test_largest_intersection_wins() {
        // Region lon 0..4; the first record shares 1° of width, the second 3°
        let table = HdiTable::new(vec![
            record("X", 0.4, square_area(3.0, 0.0, 4.0)),
            record("X", 0.8, square_area(-3.0, 0.0, 6.0)),
        ]);
        let region = Region::new("t", "Test", Some("X".into()), square_area(0.0, 0.0, 4.0));

        for _ in 0..5 {
            assert_eq!(resolve_shdi(&region, &table), Some(0.8));
        }
    }

    #[test]
    fn test_exact_tie_goes_to_first_record() {
        let table = HdiTable::new(vec![
            record("X", 0.3, square_area(-1.0, 0.0, 2.0)),
            record("X", 0.6, square_area(1.0, 0.0, 2.0)),
        ]);
        let region = Region::new("t", "Test", None, square_area(0.0, 0.0, 2.0));
        assert_eq!(resolve_shdi(&region, &table), Some(0.3));
    }

    #[test]
    fn test_country_mean() {
        let table = HdiTable::new(vec![
            record("Kenya", 0.5, square_area(0.0, 0.0, 1.0)),
            record("Kenya", 0.7, square_area(1.0, 0.0, 1.0)),
            record("Kenya", 0.9, square_area(2.0, 0.0, 1.0)),
            record("Uganda", 0.1, square_area(-5.0, 0.0, 1.0)),
        ]);
        // Geometry is irrelevant for countries
        let kenya = Region::new("k", "Kenya", Some("Kenya".into()), square_area(80.0, 0.0, 1.0));

        let shdi = resolve_shdi(&kenya, &table).unwrap();
        assert!((shdi - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_resolution_miss_is_none() {
        let table = HdiTable::new(vec![record("Kenya", 0.5, square_area(0.0, 0.0, 1.0))]);

        let far = Region::new("t", "Nowhere", None, square_area(50.0, 50.0, 1.0));
        assert_eq!(resolve_shdi(&far, &table), None);

        let atlantis = Region::new("a", "Atlantis", Some("Atlantis".into()), square_area(0.0, 0.0, 1.0));
        assert_eq!(resolve_shdi(&atlantis, &table), None);
    }

    #[test]
    fn test_resolve_all() {
        let table = HdiTable::new(vec![
            record("Kenya", 0.5, square_area(0.0, 0.0, 1.0)),
            record("Kenya", 0.7, square_area(1.0, 0.0, 1.0)),
        ]);
        let mut regions = vec![
            Region::new("1", "Kenya", Some("Kenya".into()), square_area(0.0, 0.0, 2.0)),
            Region::new("2", "Nairobi", Some("Kenya".into()), square_area(1.2, 0.2, 0.5)),
            Region::new("3", "Nowhere", None, square_area(60.0, 0.0, 1.0)),
        ];

        let stats = resolve_all(&mut regions, &table);

        assert!((regions[0].shdi.unwrap() - 0.6).abs() < 1e-9);
        assert_eq!(regions[1].shdi, Some(0.7));
        assert_eq!(regions[2].shdi, None);
        assert_eq!(
            stats,
            ResolveStats {
                regions_total: 3,
                countries_resolved: 1,
                subnational_resolved: 1,
                unresolved: 1,
            }
        );
    }

    #[test]
    fn test_summarize_region() {
        let grid = HexGrid::from_cells(vec![
            square_cell("a", 0.0, 0.0, 1.0),
            square_cell("b", 1.0, 0.0, 1.0),
            square_cell("c", 2.0, 0.0, 1.0),
        ])
        .unwrap();
        grid.replace_populations(vec![Some(10.0), Some(5.0), None]);

        // Holds the centroids of a and b; only touches c's western half
        let region = Region::new("r", "R", None, square_area(0.0, 0.0, 2.4));
        let summary = summarize_region(&grid, &region);

        assert_eq!(summary.population, Some(15.0));
        assert!(summary.area_sqkm > 0.0);
    }
}
