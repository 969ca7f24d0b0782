//! File interchange: occurrence tables in, stacks and reports as JSON.

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, SdmError};
use crate::layers::LayerStack;
use crate::occurrence::RawOccurrence;

pub const LATITUDE_COLUMN: &str = "decimalLatitude";
pub const LONGITUDE_COLUMN: &str = "decimalLongitude";

/// Read an occurrence table with `decimalLatitude` / `decimalLongitude`
/// columns. Empty or unparsable coordinate cells become missing coordinates;
/// every other column is kept as a string attribute.
pub fn read_occurrences<R: Read>(reader: R, delimiter: u8) -> Result<Vec<RawOccurrence>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(reader);
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| SdmError::InvalidParameter(format!("occurrence table has no '{name}' column")))
    };
    let lat_idx = column(LATITUDE_COLUMN)?;
    let lon_idx = column(LONGITUDE_COLUMN)?;

    let mut out = Vec::new();
    for result in reader.records() {
        let record = result?;
        let mut occ = RawOccurrence::new(
            record.get(lat_idx).and_then(parse_coordinate),
            record.get(lon_idx).and_then(parse_coordinate),
        );
        for (i, value) in record.iter().enumerate() {
            if i == lat_idx || i == lon_idx {
                continue;
            }
            if let Some(name) = headers.get(i) {
                occ.attributes.insert(name.clone(), value.to_string());
            }
        }
        out.push(occ);
    }
    debug!(rows = out.len(), "read occurrence table");
    Ok(out)
}

/// Read an occurrence table from disk. `.tsv`, `.txt` and `.tab` files are
/// tab-separated (GBIF downloads), everything else comma-separated.
pub fn read_occurrences_path(path: &Path) -> Result<Vec<RawOccurrence>> {
    let delimiter = match path.extension().and_then(|e| e.to_str()) {
        Some("tsv" | "txt" | "tab") => b'\t',
        _ => b',',
    };
    let file = fs::File::open(path)?;
    read_occurrences(file, delimiter)
}

fn parse_coordinate(s: &str) -> Option<f64> {
    let v: f64 = s.trim().parse().ok()?;
    v.is_finite().then_some(v)
}

pub fn load_stack(path: &Path) -> Result<LayerStack> {
    read_json(path)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Write pretty JSON, creating parent directories.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
