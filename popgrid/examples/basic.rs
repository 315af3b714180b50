//! Basic example: aggregate a population raster onto the hex grid and
//! query the population of a few bounding boxes.
//!
//! Run with: cargo run --example basic -- /path/to/population.bil

use geo::{coord, MultiPolygon, Rect};
use popgrid::{aggregate_population, population_in, GridError, HexGrid, RasterStore};
use std::env;

fn main() -> Result<(), GridError> {
    let raster = env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: cargo run --example basic -- /path/to/population.bil");
        std::process::exit(1);
    });

    let store = RasterStore::new();
    let ingest = store.ingest(&raster, 100)?;
    println!(
        "Ingested {} tiles ({} empty) in {} ms",
        ingest.tiles_loaded, ingest.tiles_empty, ingest.elapsed_ms
    );

    let grid = HexGrid::generate(2)?;
    let stats = aggregate_population(&grid, &store);
    println!(
        "Aggregated {} cells: {} populated, {} skipped at the poles or antimeridian",
        stats.cells_total, stats.cells_populated, stats.cells_skipped_extent
    );

    let areas = [
        ("Heidelberg", (8.6, 49.35), (8.8, 49.45)),
        ("Lagos", (3.2, 6.4), (3.5, 6.7)),
        ("Central Australia", (130.0, -26.0), (135.0, -22.0)),
    ];

    println!("\nPopulation by bounding box:");
    println!("{:-<50}", "");
    for (name, (min_x, min_y), (max_x, max_y)) in areas {
        let rect = Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y });
        let area = MultiPolygon::new(vec![rect.to_polygon()]);
        let zonal = population_in(&store, &area);
        match zonal.population {
            Some(population) => println!(
                "{}: {:.0} people on {:.0} km² ({:.1}/km²)",
                name,
                population,
                zonal.area_sqkm,
                zonal.population_per_sqkm.unwrap_or(0.0)
            ),
            None => println!("{}: no raster coverage", name),
        }
    }

    Ok(())
}
