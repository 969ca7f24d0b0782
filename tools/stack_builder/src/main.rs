//! Stack builder: decodes climate GeoTIFFs into a LayerStack JSON that
//! sdm-run's directory provider can load.
//!
//! A manifest names the scenario and lists one GeoTIFF per band:
//!
//! ```json
//! {
//!   "scenario": { "dataset": "worldclim", "resolution": "10m",
//!                 "projection": { "kind": "baseline" } },
//!   "crop": { "min_lon": -140, "max_lon": -25, "min_lat": -65, "max_lat": 20 },
//!   "bands": [ { "name": "bio1", "file": "wc2.1_10m_bio_1.tif" }, ... ]
//! }
//! ```
//!
//! Output lands at `<output>/<scenario tag>.json`.
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use sdm_core::io::write_json;
use sdm_core::provider::ClimateScenario;
use sdm_core::{Band, BoundingBox, Grid, LayerStack};
use serde::Deserialize;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

// ── Constants ────────────────────────────────────────────────────────────────

/// GeoTIFF ModelPixelScaleTag.
const TAG_PIXEL_SCALE: u16 = 33550;
/// GeoTIFF ModelTiepointTag.
const TAG_TIEPOINT: u16 = 33922;
/// GDAL's ASCII nodata tag.
const TAG_GDAL_NODATA: u16 = 42113;
/// WorldClim writes -3.4e38 for ocean; anything this low is missing.
const FLOAT_NODATA_FLOOR: f32 = -1e30;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "stack_builder", about = "Decode climate GeoTIFFs into a LayerStack JSON")]
struct Args {
    /// Manifest JSON describing the scenario and its bands.
    #[arg(short, long)]
    manifest: PathBuf,

    /// Directory the band files are relative to (default: manifest directory).
    #[arg(long)]
    raster_dir: Option<PathBuf>,

    /// Output directory (created if absent).
    #[arg(short, long, default_value = "data/layers")]
    output: PathBuf,
}

// ── Manifest schema ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Manifest {
    scenario: ClimateScenario,
    /// Overrides the GeoTIFF georeferencing for every band.
    extent: Option<BoundingBox>,
    /// Cropped before writing to keep the JSON small.
    crop: Option<BoundingBox>,
    bands: Vec<BandSource>,
}

#[derive(Deserialize)]
struct BandSource {
    name: String,
    file: PathBuf,
    /// Sample within a multi-band file, 0-based.
    #[serde(default)]
    sample: usize,
    /// Sentinel overriding the file's GDAL nodata tag.
    nodata: Option<f32>,
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// One decoded raster in TIFF storage order (row 0 = north).
struct Raster {
    width: usize,
    height: usize,
    samples: usize,
    values: Vec<f32>,
    nodata: Option<f32>,
    extent: Option<BoundingBox>,
}

fn to_f32(img: DecodingResult) -> Vec<f32> {
    match img {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
    }
}

/// Extent from ModelTiepoint + ModelPixelScale, PixelIsArea convention.
fn georeference(tiepoint: &[f64], scale: &[f64], width: usize, height: usize) -> Option<BoundingBox> {
    if tiepoint.len() < 6 || scale.len() < 2 {
        return None;
    }
    let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
    let (sx, sy) = (scale[0], scale[1]);
    let min_lon = x - i * sx;
    let max_lat = y + j * sy;
    BoundingBox::new(min_lon, min_lon + width as f64 * sx, max_lat - height as f64 * sy, max_lat).ok()
}

fn decode(path: &Path) -> Result<Raster> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file)).with_context(|| format!("{} is not a TIFF", path.display()))?;
    let (w, h) = decoder.dimensions()?;
    let (width, height) = (w as usize, h as usize);
    if width == 0 || height == 0 {
        bail!("{} has zero size", path.display());
    }

    let nodata = decoder
        .get_tag_ascii_string(Tag::Unknown(TAG_GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f32>().ok());
    let tiepoint = decoder.get_tag_f64_vec(Tag::Unknown(TAG_TIEPOINT)).ok();
    let scale = decoder.get_tag_f64_vec(Tag::Unknown(TAG_PIXEL_SCALE)).ok();
    let extent = match (tiepoint, scale) {
        (Some(t), Some(s)) => georeference(&t, &s, width, height),
        _ => None,
    };

    let values = to_f32(decoder.read_image()?);
    let samples = values.len() / (width * height);
    if samples == 0 || values.len() != samples * width * height {
        bail!("{}: {} values do not fill a {width}×{height} raster", path.display(), values.len());
    }
    Ok(Raster { width, height, samples, values, nodata, extent })
}

/// Pull one sample plane, mark nodata as NaN and flip rows N→S so that
/// row 0 is the southern edge.
fn to_grid_data(raster: &Raster, sample: usize, nodata: Option<f32>) -> Vec<f32> {
    let mut out = Vec::with_capacity(raster.width * raster.height);
    for r in (0..raster.height).rev() {
        for c in 0..raster.width {
            let v = raster.values[(r * raster.width + c) * raster.samples + sample];
            let missing = !v.is_finite() || v <= FLOAT_NODATA_FLOOR || nodata.is_some_and(|nd| v == nd);
            out.push(if missing { f32::NAN } else { v });
        }
    }
    out
}

fn build_band(source: &BandSource, dir: &Path, extent_override: Option<BoundingBox>) -> Result<Band> {
    let path = dir.join(&source.file);
    let raster = decode(&path)?;
    if source.sample >= raster.samples {
        bail!("{}: sample {} requested, file has {}", path.display(), source.sample, raster.samples);
    }
    let extent = extent_override
        .or(raster.extent)
        .with_context(|| format!("{} carries no georeferencing; set `extent` in the manifest", path.display()))?;
    let data = to_grid_data(&raster, source.sample, source.nodata.or(raster.nodata));
    let grid = Grid::from_data(raster.width, raster.height, extent, data)?;
    info!(
        band = %source.name,
        width = grid.width,
        height = grid.height,
        valid = grid.valid_count(),
        "decoded {}",
        path.display()
    );
    Ok(Band { name: source.name.clone(), grid })
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let text = std::fs::read_to_string(&args.manifest)
        .with_context(|| format!("reading manifest {}", args.manifest.display()))?;
    let manifest: Manifest = serde_json::from_str(&text).context("parsing manifest")?;
    if manifest.bands.is_empty() {
        bail!("manifest lists no bands");
    }

    let dir = match &args.raster_dir {
        Some(d) => d.clone(),
        None => args.manifest.parent().map(Path::to_path_buf).unwrap_or_default(),
    };

    let bands = manifest
        .bands
        .iter()
        .map(|b| build_band(b, &dir, manifest.extent))
        .collect::<Result<Vec<_>>>()?;
    let mut stack = LayerStack::new(bands).context("bands do not form a stack")?;
    if let Some(crop) = &manifest.crop {
        stack = stack.crop(crop).with_context(|| format!("cropping to {crop}"))?;
    }
    let empty = stack.bands().iter().filter(|b| b.grid.valid_count() == 0).count();
    if empty > 0 {
        warn!(bands = empty, "bands without any valid cell");
    }

    let out = args.output.join(format!("{}.json", manifest.scenario.tag()));
    write_json(&out, &stack).with_context(|| format!("writing {}", out.display()))?;
    info!(scenario = %manifest.scenario, bands = stack.bands().len(), "wrote {}", out.display());
    Ok(())
}
