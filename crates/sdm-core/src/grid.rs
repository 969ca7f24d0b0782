use serde::{Deserialize, Serialize};

use crate::coords::{BoundingBox, LatLon};
use crate::error::{Result, SdmError};

/// Snapping tolerance, in cells, when mapping a box edge onto the cell lattice.
const SNAP_EPS: f64 = 1e-9;

/// A 2D raster storing one variable as f32, row-major.
/// Row 0 is the southernmost row. `NaN` marks missing data.
/// Coordinate math uses f64; cell values use f32.
#[derive(Debug, Clone, Serialize)]
pub struct Grid {
    /// Row-major cell values. Serialised with `null` for missing cells.
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

/// Summary statistics over the non-missing cells of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSummary {
    pub valid_cells: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

fn null_as_nan_vec<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> std::result::Result<Vec<f32>, D::Error> {
    let v: Vec<Option<f32>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or(f32::NAN)).collect())
}

// Goes through `from_data` so a truncated or empty file is rejected on load.
impl<'de> Deserialize<'de> for Grid {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(deserialize_with = "null_as_nan_vec")]
            data: Vec<f32>,
            width: usize,
            height: usize,
            min_lon: f64,
            max_lon: f64,
            min_lat: f64,
            max_lat: f64,
        }
        let raw = Raw::deserialize(d)?;
        let extent =
            BoundingBox::new(raw.min_lon, raw.max_lon, raw.min_lat, raw.max_lat).map_err(serde::de::Error::custom)?;
        Grid::from_data(raw.width, raw.height, extent, raw.data).map_err(serde::de::Error::custom)
    }
}

impl Grid {
    /// Create a new Grid over `extent` filled with the given value.
    /// Fails on a zero dimension.
    pub fn new(width: usize, height: usize, extent: BoundingBox, fill: f32) -> Result<Self> {
        Self::from_data(width, height, extent, vec![fill; width * height])
    }

    /// Wrap existing row-major data. Fails on a zero dimension or if the
    /// length does not match.
    pub fn from_data(width: usize, height: usize, extent: BoundingBox, data: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 || data.len() != width * height {
            return Err(SdmError::MismatchedGrid(format!(
                "{} values cannot fill a {width}×{height} grid",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            min_lon: extent.min_lon,
            max_lon: extent.max_lon,
            min_lat: extent.min_lat,
            max_lat: extent.max_lat,
        })
    }

    pub fn extent(&self) -> BoundingBox {
        BoundingBox {
            min_lon: self.min_lon,
            max_lon: self.max_lon,
            min_lat: self.min_lat,
            max_lat: self.max_lat,
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.width + col] = val;
    }

    #[inline]
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        !self.get(row, col).is_nan()
    }

    pub fn cell_width(&self) -> f64 {
        (self.max_lon - self.min_lon) / self.width as f64
    }

    pub fn cell_height(&self) -> f64 {
        (self.max_lat - self.min_lat) / self.height as f64
    }

    /// Geographic centre of cell `(row, col)`.
    pub fn cell_center(&self, row: usize, col: usize) -> LatLon {
        LatLon::new(
            self.min_lat + (row as f64 + 0.5) * self.cell_height(),
            self.min_lon + (col as f64 + 0.5) * self.cell_width(),
        )
    }

    /// Cell containing `p`. Points on the max edges map to the last row/column.
    /// Returns None if `p` is outside the grid extent.
    pub fn cell_of(&self, p: LatLon) -> Option<(usize, usize)> {
        if !(p.lon >= self.min_lon && p.lon <= self.max_lon && p.lat >= self.min_lat && p.lat <= self.max_lat) {
            return None;
        }
        let col = (((p.lon - self.min_lon) / self.cell_width()).floor() as usize).min(self.width - 1);
        let row = (((p.lat - self.min_lat) / self.cell_height()).floor() as usize).min(self.height - 1);
        Some((row, col))
    }

    /// Value of the cell containing `p`; None outside the grid or on missing data.
    pub fn value_at(&self, p: LatLon) -> Option<f32> {
        let (row, col) = self.cell_of(p)?;
        let v = self.get(row, col);
        (!v.is_nan()).then_some(v)
    }

    /// True if both grids have the same dimensions and extent.
    pub fn same_geometry(&self, other: &Grid) -> bool {
        let tol = 1e-9 * self.cell_width().abs().max(self.cell_height().abs());
        self.width == other.width
            && self.height == other.height
            && (self.min_lon - other.min_lon).abs() <= tol
            && (self.max_lon - other.max_lon).abs() <= tol
            && (self.min_lat - other.min_lat).abs() <= tol
            && (self.max_lat - other.max_lat).abs() <= tol
    }

    /// Crop to the intersection of this grid's extent and `bbox`.
    ///
    /// The window snaps outward to whole cells, so every cell that overlaps
    /// `bbox` is kept:
    ///   c0 = ⌊(bbox.min_lon − min_lon) / dx⌋,  c1 = ⌈(bbox.max_lon − min_lon) / dx⌉
    /// and likewise for rows. The result's extent is the union of kept cells.
    pub fn crop(&self, bbox: &BoundingBox) -> Result<Grid> {
        let extent = self.extent();
        let overlap = extent.intersection(bbox).ok_or_else(|| SdmError::DisjointExtent {
            requested: bbox.to_string(),
            extent: extent.to_string(),
        })?;

        let dx = self.cell_width();
        let dy = self.cell_height();
        let (c0, c1) = snap_window((overlap.min_lon - self.min_lon) / dx, (overlap.max_lon - self.min_lon) / dx, self.width);
        let (r0, r1) = snap_window((overlap.min_lat - self.min_lat) / dy, (overlap.max_lat - self.min_lat) / dy, self.height);

        let width = c1 - c0;
        let height = r1 - r0;
        let mut data = Vec::with_capacity(width * height);
        for r in r0..r1 {
            let start = r * self.width;
            data.extend_from_slice(&self.data[start + c0..start + c1]);
        }

        // Keep edges bit-exact where the window reaches the original border.
        let min_lon = if c0 == 0 { self.min_lon } else { self.min_lon + c0 as f64 * dx };
        let max_lon = if c1 == self.width { self.max_lon } else { self.min_lon + c1 as f64 * dx };
        let min_lat = if r0 == 0 { self.min_lat } else { self.min_lat + r0 as f64 * dy };
        let max_lat = if r1 == self.height { self.max_lat } else { self.min_lat + r1 as f64 * dy };

        Ok(Grid { data, width, height, min_lon, max_lon, min_lat, max_lat })
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }

    /// Statistics over non-missing cells. None if every cell is missing.
    pub fn summary(&self) -> Option<GridSummary> {
        let mut valid_cells = 0usize;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        for &v in self.data.iter().filter(|v| !v.is_nan()) {
            valid_cells += 1;
            min = min.min(v);
            max = max.max(v);
            sum += v as f64;
        }
        (valid_cells > 0).then(|| GridSummary {
            valid_cells,
            min,
            max,
            mean: (sum / valid_cells as f64) as f32,
        })
    }
}

/// Map fractional cell offsets `[lo, hi]` to a half-open index window in `0..n`
/// containing at least one cell.
fn snap_window(lo: f64, hi: f64, n: usize) -> (usize, usize) {
    let start = (lo + SNAP_EPS).floor().max(0.0) as usize;
    let start = start.min(n - 1);
    let end = (hi - SNAP_EPS).ceil().max(0.0) as usize;
    let end = end.clamp(start + 1, n);
    (start, end)
}
