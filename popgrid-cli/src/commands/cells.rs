use anyhow::{Context, Result};
use popgrid::{
    query::{cells_as_feature_collection, check_size, parse_geojson},
    HexGrid,
};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

pub fn run(polygon: PathBuf, resolution: u8, size_limit: f64, output: Option<PathBuf>) -> Result<()> {
    let text = fs::read_to_string(&polygon)
        .with_context(|| format!("Failed to read {}", polygon.display()))?;
    let area = parse_geojson(&text).context("Failed to parse polygon")?;
    let area_sqkm = check_size(&area, size_limit)?;

    let grid = HexGrid::generate(resolution).context("Failed to generate hex grid")?;
    let fc = cells_as_feature_collection(&grid, &area);
    eprintln!(
        "{} cells intersect the polygon ({:.1} km²)",
        fc.features.len(),
        area_sqkm
    );

    match output {
        Some(path) => {
            let file = File::create(&path).context("Failed to create output file")?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &fc)?;
            writer.flush()?;
            eprintln!("Output written to: {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, &fc)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}
