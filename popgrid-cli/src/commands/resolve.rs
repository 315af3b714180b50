use anyhow::{bail, Context, Result};
use popgrid::{import, query::regions_as_feature_collection, resolve_all, Region, RegionKind};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{default_output, extension, spinner};

pub fn run(regions_path: PathBuf, hdi_path: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let output_path = output.unwrap_or_else(|| default_output(&regions_path, "_shdi.csv"));
    let format = extension(&output_path);
    if !matches!(format.as_str(), "csv" | "geojson" | "json") {
        bail!("Unsupported output format: {}. Use .csv or .geojson", format);
    }

    let pb = spinner("Loading regions and HDI data")?;
    let mut regions = import::load_regions(&regions_path)
        .with_context(|| format!("Failed to load regions from {}", regions_path.display()))?;
    let table = import::load_hdi_table(&hdi_path)
        .with_context(|| format!("Failed to load HDI data from {}", hdi_path.display()))?;

    pb.set_message(format!("Resolving {} regions", regions.len()));
    let stats = resolve_all(&mut regions, &table);
    pb.finish_with_message("done");

    println!("Regions:               {}", stats.regions_total);
    println!("Countries resolved:    {}", stats.countries_resolved);
    println!("Sub-national resolved: {}", stats.subnational_resolved);
    println!("Unresolved:            {}", stats.unresolved);

    match format.as_str() {
        "csv" => write_csv(&regions, &output_path)?,
        _ => {
            let file = File::create(&output_path).context("Failed to create output file")?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &regions_as_feature_collection(&regions))?;
            writer.flush()?;
        }
    }

    println!("Output written to: {}", output_path.display());
    Ok(())
}

fn write_csv(regions: &[Region], path: &Path) -> Result<()> {
    let file = File::create(path).context("Failed to create output file")?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    writer.write_record(["region_id", "name", "country", "kind", "shdi"])?;

    for region in regions {
        let kind = match region.kind() {
            RegionKind::Country { .. } => "country",
            RegionKind::Subnational => "subnational",
        };
        let shdi = region.shdi.map(|v| format!("{v:.3}")).unwrap_or_default();
        writer.write_record([
            region.region_id.as_str(),
            region.name.as_str(),
            region.country.as_deref().unwrap_or(""),
            kind,
            shdi.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
