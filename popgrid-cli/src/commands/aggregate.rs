use anyhow::{bail, Context, Result};
use popgrid::{aggregate_population, query::cell_feature, HexGrid, RasterStore};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{default_output, extension, spinner};

pub fn run(raster: PathBuf, resolution: u8, tile_size: usize, output: Option<PathBuf>) -> Result<()> {
    let output_path = output.unwrap_or_else(|| default_output(&raster, "_cells.csv"));
    let format = extension(&output_path);
    if !matches!(format.as_str(), "csv" | "geojson" | "json") {
        bail!("Unsupported output format: {}. Use .csv or .geojson", format);
    }

    let pb = spinner("Ingesting raster")?;
    let store = RasterStore::new();
    let ingest = store
        .ingest(&raster, tile_size)
        .with_context(|| format!("Failed to ingest {}", raster.display()))?;

    pb.set_message(format!("Generating hex grid (resolution {resolution})"));
    let grid = HexGrid::generate(resolution).context("Failed to generate hex grid")?;

    pb.set_message(format!("Aggregating {} cells", grid.len()));
    let stats = aggregate_population(&grid, &store);
    pb.finish_with_message("done");

    println!("Tiles loaded:       {}", ingest.tiles_loaded);
    println!("Tiles empty:        {}", ingest.tiles_empty);
    println!("Cells:              {}", stats.cells_total);
    println!("Cells populated:    {}", stats.cells_populated);
    println!("Cells skipped:      {} (extent beyond global domain)", stats.cells_skipped_extent);
    println!("Tiles misaligned:   {}", stats.tiles_misaligned);
    println!("Elapsed:            {} ms", ingest.elapsed_ms + stats.elapsed_ms);

    match format.as_str() {
        "csv" => write_csv(&grid, &output_path)?,
        _ => write_geojson(&grid, &output_path)?,
    }

    println!("Output written to: {}", output_path.display());
    Ok(())
}

fn write_csv(grid: &HexGrid, path: &Path) -> Result<()> {
    let file = File::create(path).context("Failed to create output file")?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    writer.write_record(["cell_id", "tile_id", "population"])?;

    let populations = grid.populations();
    for (cell, population) in grid.cells().iter().zip(populations.iter()) {
        let population = population.map(|p| p.to_string()).unwrap_or_default();
        writer.write_record([cell.cell_id(), cell.tile_id().unwrap_or(""), &population])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_geojson(grid: &HexGrid, path: &Path) -> Result<()> {
    let populations = grid.populations();
    let features = grid
        .cells()
        .iter()
        .zip(populations.iter())
        .map(|(cell, population)| {
            let mut feature = cell_feature(cell);
            if let Some(population) = population {
                feature.set_property("population", *population);
            }
            feature
        })
        .collect();
    let fc = geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };

    let file = File::create(path).context("Failed to create output file")?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &fc)?;
    writer.flush()?;
    Ok(())
}
