//! Global raster source files.
//!
//! Population rasters are read from ESRI BIL files: a headerless binary body
//! (`.bil`) described by a text header (`.hdr`), optionally accompanied by a
//! `.prj` with the WKT of its reference system. Sources distributed as `.zip`
//! archives are extracted next to the archive before reading.
//!
//! ## Header Keys
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `NROWS`, `NCOLS` | Raster dimensions |
//! | `NBITS`, `PIXELTYPE` | Sample format (`FLOAT` 32, `SIGNEDINT` 16/32, `UNSIGNEDINT` 8/16) |
//! | `BYTEORDER` | `I` (little-endian) or `M` (big-endian) |
//! | `ULXMAP`, `ULYMAP` | Center of the upper-left pixel |
//! | `XDIM`, `YDIM` | Pixel size in degrees |
//! | `NODATA` | No-data marker |

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{GridError, Result};
use crate::extent::BoundingBox;
use crate::tile::{RasterTile, WGS84_SRID};

/// Slack in degrees for header rounding at the edges of the globe.
const GEOGRAPHIC_TOLERANCE: f64 = 1e-6;

/// Binary encoding of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Float32,
    Int16,
    Int32,
    UInt8,
    UInt16,
}

impl SampleFormat {
    /// Returns the number of bytes per sample.
    pub fn bytes(&self) -> usize {
        match self {
            SampleFormat::UInt8 => 1,
            SampleFormat::Int16 | SampleFormat::UInt16 => 2,
            SampleFormat::Float32 | SampleFormat::Int32 => 4,
        }
    }

    fn from_header(nbits: u32, pixel_type: &str) -> Result<Self> {
        match (pixel_type, nbits) {
            ("FLOAT", 32) => Ok(SampleFormat::Float32),
            ("SIGNEDINT", 16) => Ok(SampleFormat::Int16),
            ("SIGNEDINT", 32) => Ok(SampleFormat::Int32),
            ("UNSIGNEDINT", 8) => Ok(SampleFormat::UInt8),
            ("UNSIGNEDINT", 16) => Ok(SampleFormat::UInt16),
            _ => Err(GridError::malformed(format!(
                "unsupported sample format: PIXELTYPE {pixel_type}, NBITS {nbits}"
            ))),
        }
    }
}

/// Parsed `.hdr` contents.
#[derive(Debug, Clone, PartialEq)]
pub struct BilHeader {
    pub nrows: usize,
    pub ncols: usize,
    pub format: SampleFormat,
    pub big_endian: bool,
    /// Longitude of the upper-left pixel center
    pub ulxmap: f64,
    /// Latitude of the upper-left pixel center
    pub ulymap: f64,
    pub xdim: f64,
    pub ydim: f64,
    pub nodata: Option<f32>,
}

impl BilHeader {
    /// Parse a header from its text.
    ///
    /// Keys are case-insensitive; unknown keys are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let entries: HashMap<String, String> = text
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let key = parts.next()?;
                let value = parts.next()?;
                Some((key.to_ascii_uppercase(), value.to_string()))
            })
            .collect();

        let nbands: usize = optional(&entries, "NBANDS")?.unwrap_or(1);
        if nbands != 1 {
            return Err(GridError::malformed(format!(
                "expected a single band, found {nbands}"
            )));
        }

        let nbits: u32 = optional(&entries, "NBITS")?.unwrap_or(8);
        let pixel_type = entries
            .get("PIXELTYPE")
            .map(|s| s.to_ascii_uppercase())
            .unwrap_or_else(|| "UNSIGNEDINT".to_string());
        let format = SampleFormat::from_header(nbits, &pixel_type)?;

        let big_endian = match entries.get("BYTEORDER").map(|s| s.to_ascii_uppercase()) {
            None => false,
            Some(order) if order == "I" => false,
            Some(order) if order == "M" => true,
            Some(order) => {
                return Err(GridError::malformed(format!("unknown BYTEORDER {order}")));
            }
        };

        let header = Self {
            nrows: required(&entries, "NROWS")?,
            ncols: required(&entries, "NCOLS")?,
            format,
            big_endian,
            ulxmap: required(&entries, "ULXMAP")?,
            ulymap: required(&entries, "ULYMAP")?,
            xdim: required(&entries, "XDIM")?,
            ydim: required(&entries, "YDIM")?,
            nodata: optional(&entries, "NODATA")?,
        };

        if header.nrows == 0 || header.ncols == 0 {
            return Err(GridError::malformed("raster has no pixels"));
        }
        if !(header.xdim > 0.0 && header.ydim > 0.0) {
            return Err(GridError::malformed("XDIM and YDIM must be positive"));
        }
        header.body_size()?;

        Ok(header)
    }

    /// Expected size of the `.bil` body in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::MalformedRaster`] if the size overflows `usize`.
    pub fn body_size(&self) -> Result<usize> {
        self.nrows
            .checked_mul(self.ncols)
            .and_then(|pixels| pixels.checked_mul(self.format.bytes()))
            .ok_or_else(|| {
                GridError::malformed(format!(
                    "{} x {} pixels overflow the addressable size",
                    self.nrows, self.ncols
                ))
            })
    }

    /// Longitude of the western raster edge.
    pub fn west(&self) -> f64 {
        self.ulxmap - self.xdim / 2.0
    }

    /// Latitude of the northern raster edge.
    pub fn north(&self) -> f64 {
        self.ulymap + self.ydim / 2.0
    }

    /// Extent covered by the raster.
    pub fn extent(&self) -> BoundingBox {
        BoundingBox::new(
            self.north() - self.nrows as f64 * self.ydim,
            self.west(),
            self.north(),
            self.west() + self.ncols as f64 * self.xdim,
        )
    }

    /// Whether the extent fits in geographic lon/lat degrees.
    ///
    /// Projected rasters (metres, e.g. Mollweide) announce extents far
    /// outside ±180° / ±90°.
    pub fn is_geographic(&self) -> bool {
        let e = self.extent();
        e.min_lon >= -180.0 - GEOGRAPHIC_TOLERANCE
            && e.max_lon <= 180.0 + GEOGRAPHIC_TOLERANCE
            && e.min_lat >= -90.0 - GEOGRAPHIC_TOLERANCE
            && e.max_lat <= 90.0 + GEOGRAPHIC_TOLERANCE
    }
}

fn required<T: std::str::FromStr>(entries: &HashMap<String, String>, key: &str) -> Result<T> {
    optional(entries, key)?.ok_or_else(|| GridError::malformed(format!("missing {key}")))
}

fn optional<T: std::str::FromStr>(
    entries: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>> {
    match entries.get(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| GridError::malformed(format!("invalid {key}: {raw}"))),
        None => Ok(None),
    }
}

/// A memory-mapped global raster ready to be cut into tiles.
pub struct RasterSource {
    header: BilHeader,
    /// Memory-mapped `.bil` body
    data: Mmap,
    path: PathBuf,
}

impl RasterSource {
    /// Open a raster from a `.bil` path (or a `.zip` containing one).
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file or its `.hdr` cannot be read
    /// - The header is malformed or the body size doesn't match it
    /// - The `.prj` sidecar declares a projected reference system
    /// - The header extent lies outside ±180° / ±90° (a projected grid)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GridError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let bil_path = if has_extension(path, "zip") {
            extract_bil_from_zip(path)?
        } else {
            path.to_path_buf()
        };

        let header_text = std::fs::read_to_string(bil_path.with_extension("hdr"))?;
        let header = BilHeader::parse(&header_text)?;

        let prj_path = bil_path.with_extension("prj");
        if prj_path.exists() {
            check_reference_system(&std::fs::read_to_string(prj_path)?)?;
        }
        if !header.is_geographic() {
            let e = header.extent();
            return Err(GridError::UnsupportedCrs {
                name: format!(
                    "extent lon {}..{} lat {}..{} is not in degrees",
                    e.min_lon, e.max_lon, e.min_lat, e.max_lat
                ),
            });
        }

        let file = File::open(&bil_path)?;

        // SAFETY: Memory mapping is safe as long as the file is not modified
        // while mapped. We open the file read-only and don't expose the mapping.
        let mmap = unsafe { Mmap::map(&file)? };

        let expected = header.body_size()?;
        if mmap.len() != expected {
            return Err(GridError::InvalidFileSize {
                size: mmap.len(),
                expected,
            });
        }

        Ok(Self {
            header,
            data: mmap,
            path: bil_path,
        })
    }

    /// Returns the parsed header.
    pub fn header(&self) -> &BilHeader {
        &self.header
    }

    /// Returns the path of the `.bil` body.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw sample at a row/column index (row 0 = north edge).
    pub fn sample(&self, row: usize, col: usize) -> f32 {
        let width = self.header.format.bytes();
        let offset = (row * self.header.ncols + col) * width;
        let bytes = &self.data[offset..offset + width];
        let be = self.header.big_endian;

        match self.header.format {
            SampleFormat::UInt8 => bytes[0] as f32,
            SampleFormat::Int16 => {
                let raw = [bytes[0], bytes[1]];
                (if be { i16::from_be_bytes(raw) } else { i16::from_le_bytes(raw) }) as f32
            }
            SampleFormat::UInt16 => {
                let raw = [bytes[0], bytes[1]];
                (if be { u16::from_be_bytes(raw) } else { u16::from_le_bytes(raw) }) as f32
            }
            SampleFormat::Int32 => {
                let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
                (if be { i32::from_be_bytes(raw) } else { i32::from_le_bytes(raw) }) as f32
            }
            SampleFormat::Float32 => {
                let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
                if be {
                    f32::from_be_bytes(raw)
                } else {
                    f32::from_le_bytes(raw)
                }
            }
        }
    }

    /// Cut the raster into `tile_size` x `tile_size` tiles.
    ///
    /// Edge tiles are padded with no-data so every tile has the same
    /// dimensions. Tiles without a single data pixel are dropped; the second
    /// element of the returned pair counts them.
    pub fn tiles(&self, tile_size: usize) -> Result<(Vec<RasterTile>, usize)> {
        if tile_size == 0 {
            return Err(GridError::InvalidTileSize { size: tile_size });
        }

        let h = &self.header;
        let fill = h.nodata.unwrap_or(f32::NAN);
        let tile_rows = h.nrows.div_ceil(tile_size);
        let tile_cols = h.ncols.div_ceil(tile_size);

        let mut tiles = Vec::new();
        let mut empty = 0;

        for tr in 0..tile_rows {
            for tc in 0..tile_cols {
                let mut data = vec![fill; tile_size * tile_size];
                let row_offset = tr * tile_size;
                let col_offset = tc * tile_size;

                for r in 0..tile_size.min(h.nrows - row_offset) {
                    for c in 0..tile_size.min(h.ncols - col_offset) {
                        data[r * tile_size + c] = self.sample(row_offset + r, col_offset + c);
                    }
                }

                let tile = RasterTile::with_pixel_size(
                    (tr * tile_cols + tc) as u32,
                    h.west() + col_offset as f64 * h.xdim,
                    h.north() - row_offset as f64 * h.ydim,
                    (h.xdim, h.ydim),
                    (tile_size, tile_size),
                    data,
                )?
                .with_nodata(h.nodata)
                .with_srid(WGS84_SRID);

                if tile.has_data() {
                    tiles.push(tile);
                } else {
                    empty += 1;
                }
            }
        }

        Ok((tiles, empty))
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Reject WKT that describes anything but a geographic lon/lat system.
fn check_reference_system(wkt: &str) -> Result<()> {
    let trimmed = wkt.trim_start();
    if trimmed.starts_with("PROJCS") || trimmed.starts_with("PROJCRS") {
        let name = trimmed
            .split('"')
            .nth(1)
            .unwrap_or("unknown projected CRS")
            .to_string();
        return Err(GridError::UnsupportedCrs { name });
    }
    Ok(())
}

/// Extract the `.bil`, `.hdr` and `.prj` members of a zip archive next to it.
///
/// Returns the path of the extracted `.bil`.
fn extract_bil_from_zip(zip_path: &Path) -> Result<PathBuf> {
    let file = File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| GridError::malformed(e.to_string()))?;
    let out_dir = zip_path.parent().unwrap_or_else(|| Path::new("."));

    let mut bil_path = None;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| GridError::malformed(e.to_string()))?;

        // Only the file name is kept, so archive paths can't escape out_dir
        let name = match Path::new(entry.name()).file_name() {
            Some(name) => name.to_owned(),
            None => continue,
        };
        let out_path = out_dir.join(&name);
        let wanted = ["bil", "hdr", "prj"]
            .iter()
            .any(|ext| has_extension(&out_path, ext));
        if !wanted {
            continue;
        }

        let mut out_file = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out_file)?;
        if has_extension(&out_path, "bil") {
            bil_path = Some(out_path);
        }
    }

    bil_path.ok_or_else(|| {
        GridError::malformed(format!("no .bil file found in {}", zip_path.display()))
    })
}
