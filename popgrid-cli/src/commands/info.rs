use anyhow::{bail, Context, Result};
use popgrid::source::{RasterSource, SampleFormat};
use std::path::PathBuf;

pub fn run(raster: PathBuf, tile_size: usize) -> Result<()> {
    if !raster.exists() {
        bail!("Raster not found: {}", raster.display());
    }

    let source = RasterSource::open(&raster).context("Failed to open raster")?;
    let header = source.header();

    // Scan for value range and population total
    let (mut min, mut max, mut total) = (f64::MAX, f64::MIN, 0.0);
    let mut nodata_count = 0u64;
    for row in 0..header.nrows {
        for col in 0..header.ncols {
            let value = source.sample(row, col);
            if header.nodata == Some(value) || !value.is_finite() {
                nodata_count += 1;
                continue;
            }
            let value = value as f64;
            min = min.min(value);
            max = max.max(value);
            total += value;
        }
    }

    let (tiles, empty) = source.tiles(tile_size).context("Failed to tile raster")?;

    let format = match header.format {
        SampleFormat::Float32 => "float32",
        SampleFormat::Int16 => "int16",
        SampleFormat::Int32 => "int32",
        SampleFormat::UInt8 => "uint8",
        SampleFormat::UInt16 => "uint16",
    };
    let extent = header.extent();
    let metadata = std::fs::metadata(source.path())?;

    println!("Raster: {}", source.path().display());
    println!("Body size: {} bytes", metadata.len());
    println!("Dimensions: {} cols x {} rows", header.ncols, header.nrows);
    println!("Pixel type: {}{}", format, if header.big_endian { " (big-endian)" } else { "" });
    println!("Pixel size: {} x {} degrees", header.xdim, header.ydim);
    println!(
        "Extent: lon {:.4} to {:.4}, lat {:.4} to {:.4}",
        extent.min_lon, extent.max_lon, extent.min_lat, extent.max_lat
    );
    match header.nodata {
        Some(v) => println!("No-data value: {}", v),
        None => println!("No-data value: none"),
    }
    println!();
    println!("Statistics:");
    if nodata_count < (header.nrows * header.ncols) as u64 {
        println!("  Value range: {} to {}", min, max);
        println!("  Total: {:.0}", total);
    }
    println!("  No-data pixels: {}", nodata_count);
    println!(
        "  Tiles at {}px: {} with data, {} empty",
        tile_size,
        tiles.len(),
        empty
    );

    Ok(())
}
