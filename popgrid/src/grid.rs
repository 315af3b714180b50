//! The discrete global hex grid.
//!
//! [`HexGrid`] is an arena of immutable cells addressed by stable identifier.
//! Geometry never changes after construction; the per-cell population is the
//! only mutable attribute and is swapped in bulk by the aggregation engine.
//!
//! # Example
//!
//! ```ignore
//! use popgrid::HexGrid;
//!
//! let grid = HexGrid::generate(4)?;
//! for cell in grid.cells_intersecting(&area) {
//!     println!("{} {:?}", cell.cell_id(), grid.population(cell.cell_id()));
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use geo::{coord, Area, Centroid, Coord, Intersects, LineString, MultiPolygon, Point, Polygon};
use h3o::{CellIndex, Resolution};
use parking_lot::RwLock;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;

use crate::error::{GridError, Result};
use crate::extent::BoundingBox;

type CellEntry = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// One cell of the grid.
///
/// The outline is a multi-polygon so that a cell crossing the antimeridian
/// can be stored as one piece on each side of it.
#[derive(Debug, Clone)]
pub struct HexCell {
    cell_id: String,
    geometry: MultiPolygon<f64>,
    tile_id: Option<String>,
    extent: Option<BoundingBox>,
}

impl HexCell {
    /// Create a cell.
    ///
    /// `tile_id` names the grid partition the cell was generated in, if any.
    pub fn new(
        cell_id: impl Into<String>,
        geometry: impl Into<MultiPolygon<f64>>,
        tile_id: Option<String>,
    ) -> Self {
        let geometry = geometry.into();
        let extent = BoundingBox::of_multi_polygon(&geometry);
        Self {
            cell_id: cell_id.into(),
            geometry,
            tile_id,
            extent,
        }
    }

    fn from_h3(cell: CellIndex) -> Self {
        let ring: Vec<Coord<f64>> = cell
            .boundary()
            .iter()
            .map(|ll| coord! { x: ll.lng_radians().to_degrees(), y: ll.lat_radians().to_degrees() })
            .collect();

        let base_cell = u8::from(cell.base_cell());
        Self::new(
            cell.to_string(),
            wrap_outline(&ring),
            Some(base_cell.to_string()),
        )
    }

    /// Returns the stable cell identifier.
    pub fn cell_id(&self) -> &str {
        &self.cell_id
    }

    /// Returns the cell outline in lon/lat, one polygon per side of the
    /// antimeridian.
    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    /// Centroid of the largest piece of the outline.
    pub fn centroid(&self) -> Option<Point<f64>> {
        self.geometry
            .iter()
            .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
            .and_then(|piece| piece.centroid())
    }

    /// Returns the partition the cell belongs to.
    pub fn tile_id(&self) -> Option<&str> {
        self.tile_id.as_deref()
    }

    /// Returns the lon/lat extent of the whole outline.
    ///
    /// A cell split at the antimeridian or capped at a pole spans the full
    /// longitude range.
    pub fn extent(&self) -> Option<BoundingBox> {
        self.extent
    }
}

/// Winding, in degrees, above which a ring is taken to enclose a pole.
const POLE_WINDING: f64 = 180.0;

/// Turn a raw H3 boundary into pieces that stay inside ±180° longitude.
///
/// A ring that winds around a pole becomes a cap closed along the pole
/// latitude. A ring whose longitudes jump across the antimeridian is cut at
/// ±180° into an eastern and a western piece.
fn wrap_outline(ring: &[Coord<f64>]) -> MultiPolygon<f64> {
    let winding = lon_winding(ring);
    if winding.abs() > POLE_WINDING {
        let pole = if ring.iter().map(|c| c.y).sum::<f64>() >= 0.0 { 90.0 } else { -90.0 };
        return MultiPolygon::new(polar_cap(ring, pole).into_iter().collect());
    }

    let crosses = ring
        .iter()
        .zip(ring.iter().cycle().skip(1))
        .any(|(a, b)| (b.x - a.x).abs() > 180.0);
    if !crosses {
        return MultiPolygon::new(closed_polygon(ring.to_vec()).into_iter().collect());
    }

    let shifted: Vec<Coord<f64>> = ring
        .iter()
        .map(|c| if c.x < 0.0 { coord! { x: c.x + 360.0, y: c.y } } else { *c })
        .collect();
    let west = clip_at_antimeridian(&shifted, |x| x <= 180.0);
    let east: Vec<Coord<f64>> = clip_at_antimeridian(&shifted, |x| x >= 180.0)
        .into_iter()
        .map(|c| coord! { x: c.x - 360.0, y: c.y })
        .collect();

    MultiPolygon::new(
        [west, east]
            .into_iter()
            .filter_map(closed_polygon)
            .collect(),
    )
}

/// Sum of the signed longitude steps around a ring, each taken the short
/// way round.
fn lon_winding(ring: &[Coord<f64>]) -> f64 {
    ring.iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|(a, b)| {
            let step = b.x - a.x;
            if step > 180.0 {
                step - 360.0
            } else if step < -180.0 {
                step + 360.0
            } else {
                step
            }
        })
        .sum()
}

fn polar_cap(ring: &[Coord<f64>], pole: f64) -> Option<Polygon<f64>> {
    let mut sorted = ring.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x));
    let (first, last) = (*sorted.first()?, *sorted.last()?);

    // Latitude where the edge from the easternmost to the westernmost vertex
    // meets the antimeridian
    let gap = first.x + 360.0 - last.x;
    let y = if gap > 0.0 {
        last.y + (first.y - last.y) * (180.0 - last.x) / gap
    } else {
        last.y
    };

    let mut coords = Vec::with_capacity(sorted.len() + 4);
    coords.push(coord! { x: -180.0, y: y });
    coords.extend(sorted);
    coords.push(coord! { x: 180.0, y: y });
    coords.push(coord! { x: 180.0, y: pole });
    coords.push(coord! { x: -180.0, y: pole });
    closed_polygon(coords)
}

/// Keep the part of a ring on one side of the 180° meridian.
fn clip_at_antimeridian(ring: &[Coord<f64>], keep: impl Fn(f64) -> bool) -> Vec<Coord<f64>> {
    let mut clipped = Vec::with_capacity(ring.len() + 2);
    for (a, b) in ring.iter().zip(ring.iter().cycle().skip(1)) {
        let (a_in, b_in) = (keep(a.x), keep(b.x));
        if a_in {
            clipped.push(*a);
        }
        if a_in != b_in {
            let t = (180.0 - a.x) / (b.x - a.x);
            clipped.push(coord! { x: 180.0, y: a.y + t * (b.y - a.y) });
        }
    }
    clipped
}

fn closed_polygon(coords: Vec<Coord<f64>>) -> Option<Polygon<f64>> {
    if coords.len() < 3 {
        return None;
    }
    Some(Polygon::new(LineString::new(coords), vec![]))
}

/// Immutable cell arena with an R-tree over cell extents.
pub struct HexGrid {
    cells: Vec<HexCell>,
    by_id: HashMap<String, usize>,
    index: RTree<CellEntry>,
    populations: RwLock<Arc<Vec<Option<f64>>>>,
}

impl HexGrid {
    /// Build a grid from explicit cells.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::DuplicateCell`] if two cells share an identifier.
    pub fn from_cells<I: IntoIterator<Item = HexCell>>(cells: I) -> Result<Self> {
        let cells: Vec<HexCell> = cells.into_iter().collect();

        let mut by_id = HashMap::with_capacity(cells.len());
        for (i, cell) in cells.iter().enumerate() {
            if by_id.insert(cell.cell_id.clone(), i).is_some() {
                return Err(GridError::DuplicateCell {
                    cell_id: cell.cell_id.clone(),
                });
            }
        }

        // One entry per outline piece
        let entries = cells
            .iter()
            .enumerate()
            .flat_map(|(i, cell)| {
                cell.geometry.iter().filter_map(move |piece| {
                    let e = BoundingBox::of_polygon(piece)?;
                    Some(GeomWithData::new(
                        Rectangle::from_corners([e.min_lon, e.min_lat], [e.max_lon, e.max_lat]),
                        i,
                    ))
                })
            })
            .collect();

        let populations = vec![None; cells.len()];
        Ok(Self {
            cells,
            by_id,
            index: RTree::bulk_load(entries),
            populations: RwLock::new(Arc::new(populations)),
        })
    }

    /// Generate every H3 cell at `resolution` (0-15).
    ///
    /// Cell ids are the H3 index strings; the tile id is the H3 base cell
    /// number. Outlines crossing the antimeridian are split at ±180° and the
    /// two polar cells are capped at the pole.
    pub fn generate(resolution: u8) -> Result<Self> {
        let res =
            Resolution::try_from(resolution).map_err(|_| GridError::InvalidResolution { resolution })?;

        let cells = CellIndex::base_cells()
            .flat_map(|base| base.children(res))
            .map(HexCell::from_h3);

        let grid = Self::from_cells(cells)?;
        tracing::info!(resolution, cells = grid.len(), "Hex grid generated");
        Ok(grid)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the grid has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// All cells in storage order.
    pub fn cells(&self) -> &[HexCell] {
        &self.cells
    }

    /// Look up a cell by identifier.
    pub fn get(&self, cell_id: &str) -> Option<&HexCell> {
        self.by_id.get(cell_id).map(|&i| &self.cells[i])
    }

    /// Storage position of a cell.
    pub fn position(&self, cell_id: &str) -> Option<usize> {
        self.by_id.get(cell_id).copied()
    }

    /// Cells whose outline intersects `area`, in storage order.
    ///
    /// The returned iterator is lazy; clone it to walk the sequence again.
    pub fn cells_intersecting<'a>(&'a self, area: &'a MultiPolygon<f64>) -> CellsIntersecting<'a> {
        let mut candidates: Vec<usize> = match BoundingBox::of_multi_polygon(area) {
            Some(bbox) => self
                .index
                .locate_in_envelope_intersecting(&bbox.to_aabb())
                .map(|entry| entry.data)
                .collect(),
            None => Vec::new(),
        };
        candidates.sort_unstable();
        candidates.dedup();

        CellsIntersecting {
            grid: self,
            area,
            candidates,
            next: 0,
        }
    }

    /// Population of one cell, `None` if unknown or not computed.
    pub fn population(&self, cell_id: &str) -> Option<f64> {
        let i = *self.by_id.get(cell_id)?;
        self.populations.read()[i]
    }

    /// Current populations, indexed like [`HexGrid::cells`].
    pub fn populations(&self) -> Arc<Vec<Option<f64>>> {
        self.populations.read().clone()
    }

    /// Swap in a freshly computed population vector.
    pub(crate) fn replace_populations(&self, populations: Vec<Option<f64>>) {
        debug_assert_eq!(populations.len(), self.cells.len());
        *self.populations.write() = Arc::new(populations);
    }
}

/// Lazy sequence of cells intersecting a polygon.
#[derive(Clone)]
pub struct CellsIntersecting<'a> {
    grid: &'a HexGrid,
    area: &'a MultiPolygon<f64>,
    candidates: Vec<usize>,
    next: usize,
}

impl<'a> Iterator for CellsIntersecting<'a> {
    type Item = &'a HexCell;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(&i) = self.candidates.get(self.next) {
            self.next += 1;
            let cell = &self.grid.cells[i];
            if cell.geometry.intersects(self.area) {
                return Some(cell);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.candidates.len() - self.next))
    }
}
