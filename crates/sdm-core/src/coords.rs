//! Geographic coordinate types and bounding boxes.
//! All coordinate math uses f64 for precision.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdmError};

/// A point in geographic coordinates (WGS84 degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    /// Latitude in degrees, -90 to +90.
    pub lat: f64,
    /// Longitude in degrees, -180 to +180.
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// True if both components are finite and inside the legal ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Bit-exact key for exact-equality hashing. `-0.0` and `0.0` share a key.
    pub(crate) fn exact_key(&self) -> (u64, u64) {
        ((self.lat + 0.0).to_bits(), (self.lon + 0.0).to_bits())
    }
}

/// An axis-aligned lon/lat rectangle with `min < max` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Build a box, rejecting non-finite or empty ranges.
    pub fn new(min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> Result<Self> {
        let finite = [min_lon, max_lon, min_lat, max_lat].iter().all(|v| v.is_finite());
        if !finite || min_lon >= max_lon || min_lat >= max_lat {
            return Err(SdmError::InvalidBoundingBox(format!(
                "({min_lon}, {max_lon}, {min_lat}, {max_lat})"
            )));
        }
        Ok(Self { min_lon, max_lon, min_lat, max_lat })
    }

    /// Strict containment: points on an edge are outside.
    pub fn contains_strict(&self, p: LatLon) -> bool {
        self.min_lon < p.lon && p.lon < self.max_lon && self.min_lat < p.lat && p.lat < self.max_lat
    }

    /// True if the two boxes share a region of non-zero area.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon < other.max_lon
            && other.min_lon < self.max_lon
            && self.min_lat < other.max_lat
            && other.min_lat < self.max_lat
    }

    /// Overlapping region, or `None` when the boxes are disjoint.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BoundingBox {
            min_lon: self.min_lon.max(other.min_lon),
            max_lon: self.max_lon.min(other.max_lon),
            min_lat: self.min_lat.max(other.min_lat),
            max_lat: self.max_lat.min(other.max_lat),
        })
    }

    /// Smallest box around `points`, grown by `buffer_deg` on every side.
    ///
    ///   (min(lon) − b, max(lon) + b, min(lat) − b, max(lat) + b)
    ///
    /// No clamping to the globe is applied.
    pub fn around(points: &[LatLon], buffer_deg: f64) -> Result<Self> {
        if points.is_empty() {
            return Err(SdmError::EmptyInput("cannot build an extent around zero points".into()));
        }
        if !buffer_deg.is_finite() || buffer_deg < 0.0 {
            return Err(SdmError::InvalidParameter(format!("buffer must be >= 0, got {buffer_deg}")));
        }
        let mut min_lon = f64::INFINITY;
        let mut max_lon = f64::NEG_INFINITY;
        let mut min_lat = f64::INFINITY;
        let mut max_lat = f64::NEG_INFINITY;
        for p in points {
            min_lon = min_lon.min(p.lon);
            max_lon = max_lon.max(p.lon);
            min_lat = min_lat.min(p.lat);
            max_lat = max_lat.max(p.lat);
        }
        Self::new(min_lon - buffer_deg, max_lon + buffer_deg, min_lat - buffer_deg, max_lat + buffer_deg)
    }

    pub fn width_deg(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height_deg(&self) -> f64 {
        self.max_lat - self.min_lat
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[lon {}..{}, lat {}..{}]",
            self.min_lon, self.max_lon, self.min_lat, self.max_lat
        )
    }
}
