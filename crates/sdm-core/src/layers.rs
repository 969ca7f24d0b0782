//! Environmental layer stacks: ordered, named raster bands on one lattice.
//!
//! A stack is built once and never mutated; selection and cropping return new
//! stacks. The current and future scenario stacks are handled identically.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coords::{BoundingBox, LatLon};
use crate::error::{Result, SdmError};
use crate::grid::Grid;

/// One named raster band, e.g. `bio1` (annual mean temperature).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub grid: Grid,
}

/// Ordered set of uniquely named bands sharing identical geometry.
#[derive(Debug, Clone, Serialize)]
pub struct LayerStack {
    bands: Vec<Band>,
}

impl<'de> Deserialize<'de> for LayerStack {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            bands: Vec<Band>,
        }
        let raw = Raw::deserialize(d)?;
        LayerStack::new(raw.bands).map_err(serde::de::Error::custom)
    }
}

impl LayerStack {
    /// Build a stack. Fails on an empty band list, a duplicate band name or a
    /// band whose geometry differs from the first.
    pub fn new(bands: Vec<Band>) -> Result<Self> {
        let first = bands
            .first()
            .ok_or_else(|| SdmError::EmptyInput("a layer stack needs at least one band".into()))?;
        let mut seen = HashSet::new();
        for band in &bands {
            if !seen.insert(band.name.as_str()) {
                return Err(SdmError::InvalidParameter(format!("duplicate band '{}'", band.name)));
            }
            if !band.grid.same_geometry(&first.grid) {
                return Err(SdmError::MismatchedGrid(format!(
                    "band '{}' does not share the geometry of band '{}'",
                    band.name, first.name
                )));
            }
        }
        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.iter().find(|b| b.name == name)
    }

    /// Grid of the first band; all bands share its geometry.
    pub fn reference_grid(&self) -> &Grid {
        &self.bands[0].grid
    }

    pub fn extent(&self) -> BoundingBox {
        self.reference_grid().extent()
    }

    pub fn width(&self) -> usize {
        self.reference_grid().width
    }

    pub fn height(&self) -> usize {
        self.reference_grid().height
    }

    /// Drop the named bands, keeping the order of the rest.
    /// Every excluded name must exist in the stack.
    pub fn exclude<S: AsRef<str>>(&self, excluded: &[S]) -> Result<LayerStack> {
        for name in excluded {
            self.require(name.as_ref())?;
        }
        let drop: HashSet<&str> = excluded.iter().map(|s| s.as_ref()).collect();
        let bands: Vec<Band> = self.bands.iter().filter(|b| !drop.contains(b.name.as_str())).cloned().collect();
        debug!(removed = drop.len(), remaining = bands.len(), "excluded bands");
        LayerStack::new(bands)
    }

    /// Keep only the named bands, in the requested order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<LayerStack> {
        let bands = names
            .iter()
            .map(|n| self.require(n.as_ref()).cloned())
            .collect::<Result<Vec<_>>>()?;
        LayerStack::new(bands)
    }

    /// Crop every band to `bbox`. Fails if `bbox` misses the stack extent.
    pub fn crop(&self, bbox: &BoundingBox) -> Result<LayerStack> {
        let bands = self
            .bands
            .iter()
            .map(|b| Ok(Band { name: b.name.clone(), grid: b.grid.crop(bbox)? }))
            .collect::<Result<Vec<_>>>()?;
        let stack = LayerStack::new(bands)?;
        debug!(width = stack.width(), height = stack.height(), "cropped stack to {bbox}");
        Ok(stack)
    }

    /// Fails with `UnknownBand` if either stack has a band the other lacks,
    /// and with `InvalidParameter` if the shared bands are ordered differently.
    pub fn ensure_same_bands(&self, other: &LayerStack) -> Result<()> {
        for name in self.band_names() {
            other.require(name)?;
        }
        for name in other.band_names() {
            self.require(name)?;
        }
        if self.band_names() != other.band_names() {
            return Err(SdmError::InvalidParameter("stacks list the same bands in a different order".into()));
        }
        Ok(())
    }

    /// True if cell `(row, col)` holds data in every band.
    pub fn is_valid_cell(&self, row: usize, col: usize) -> bool {
        self.bands.iter().all(|b| b.grid.is_valid(row, col))
    }

    /// All `(row, col)` cells valid in every band, row-major order.
    pub fn valid_cells(&self) -> Vec<(usize, usize)> {
        let (w, h) = (self.width(), self.height());
        (0..h)
            .flat_map(|r| (0..w).map(move |c| (r, c)))
            .filter(|&(r, c)| self.is_valid_cell(r, c))
            .collect()
    }

    /// Band values at a cell in band order, or None if any band is missing.
    pub fn values_at_cell(&self, row: usize, col: usize) -> Option<Vec<f64>> {
        self.bands
            .iter()
            .map(|b| {
                let v = b.grid.get(row, col);
                (!v.is_nan()).then_some(v as f64)
            })
            .collect()
    }

    /// Band values at the cell containing `p`.
    pub fn values_at(&self, p: LatLon) -> Option<Vec<f64>> {
        let (row, col) = self.reference_grid().cell_of(p)?;
        self.values_at_cell(row, col)
    }

    fn require(&self, name: &str) -> Result<&Band> {
        self.band(name).ok_or_else(|| SdmError::UnknownBand { band: name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(name: &str, fill: f32) -> Band {
        let extent = BoundingBox::new(-80.0, -40.0, -40.0, 0.0).unwrap();
        Band { name: name.into(), grid: Grid::new(4, 4, extent, fill).unwrap() }
    }

    fn bioclim_stack() -> LayerStack {
        LayerStack::new((1..=19).map(|i| band(&format!("bio{i}"), i as f32)).collect()).unwrap()
    }

    #[test]
    fn new_rejects_duplicates_and_mismatched_geometry() {
        assert!(LayerStack::new(vec![]).is_err());
        assert!(LayerStack::new(vec![band("bio1", 0.0), band("bio1", 1.0)]).is_err());

        let other_extent = BoundingBox::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let odd = Band { name: "bio2".into(), grid: Grid::new(4, 4, other_extent, 0.0).unwrap() };
        assert!(matches!(
            LayerStack::new(vec![band("bio1", 0.0), odd]),
            Err(SdmError::MismatchedGrid(_))
        ));
    }

    #[test]
    fn exclude_keeps_order_of_remaining_bands() {
        let s = bioclim_stack().exclude(&["bio8", "bio9", "bio18", "bio19"]).unwrap();
        let expected: Vec<String> = [1, 2, 3, 4, 5, 6, 7, 10, 11, 12, 13, 14, 15, 16, 17]
            .iter()
            .map(|i| format!("bio{i}"))
            .collect();
        assert_eq!(s.band_names(), expected);
    }

    #[test]
    fn exclude_unknown_band_fails() {
        let err = bioclim_stack().exclude(&["bio20"]).unwrap_err();
        assert!(matches!(err, SdmError::UnknownBand { band } if band == "bio20"));
    }

    #[test]
    fn select_uses_requested_order() {
        let s = bioclim_stack().select(&["bio12", "bio1"]).unwrap();
        assert_eq!(s.band_names(), vec!["bio12", "bio1"]);
        assert!(bioclim_stack().select(&["nope"]).is_err());
    }

    #[test]
    fn valid_cells_require_every_band() {
        let mut a = band("bio1", 1.0);
        let mut b = band("bio2", 2.0);
        a.grid.set(0, 0, f32::NAN);
        b.grid.set(3, 3, f32::NAN);
        let s = LayerStack::new(vec![a, b]).unwrap();
        let cells = s.valid_cells();
        assert_eq!(cells.len(), 14);
        assert!(!cells.contains(&(0, 0)));
        assert!(!cells.contains(&(3, 3)));
        assert!(s.values_at_cell(0, 0).is_none());
        assert_eq!(s.values_at_cell(1, 1), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn crop_to_own_extent_round_trips() {
        let s = bioclim_stack();
        let c = s.crop(&s.extent()).unwrap();
        assert_eq!(c.band_names(), s.band_names());
        for (x, y) in c.bands().iter().zip(s.bands()) {
            assert!(x.grid.same_geometry(&y.grid));
            assert_eq!(x.grid.data, y.grid.data);
        }
    }

    #[test]
    fn ensure_same_bands_detects_differences() {
        let current = bioclim_stack().exclude(&["bio8"]).unwrap();
        let future = bioclim_stack().exclude(&["bio9"]).unwrap();
        assert!(matches!(current.ensure_same_bands(&future), Err(SdmError::UnknownBand { .. })));
        assert!(current.ensure_same_bands(&current.clone()).is_ok());
    }

    #[test]
    fn deserialize_validates_geometry() {
        let s = bioclim_stack();
        let json = serde_json::to_string(&s).unwrap();
        let back: LayerStack = serde_json::from_str(&json).unwrap();
        assert_eq!(back.band_names(), s.band_names());

        let bad = r#"{"bands": []}"#;
        assert!(serde_json::from_str::<LayerStack>(bad).is_err());
    }

    #[test]
    fn deserialize_rejects_truncated_band() {
        let truncated = r#"{"bands": [{"name": "bio1", "grid": {"data": [1.0, 2.0, null],
            "width": 2, "height": 2, "min_lon": 0.0, "max_lon": 2.0, "min_lat": 0.0, "max_lat": 2.0}}]}"#;
        assert!(serde_json::from_str::<LayerStack>(truncated).is_err());

        let empty = r#"{"bands": [{"name": "bio1", "grid": {"data": [],
            "width": 0, "height": 0, "min_lon": 0.0, "max_lon": 2.0, "min_lat": 0.0, "max_lat": 2.0}}]}"#;
        assert!(serde_json::from_str::<LayerStack>(empty).is_err());
    }
}
