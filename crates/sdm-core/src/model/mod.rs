//! Presence-only estimator interface.
//!
//! An [`Estimator`] fits on presence coordinates plus an environmental stack
//! and yields a [`Suitability`] model. A model scores a vector of band values
//! (in the band order it was trained on) and projects onto any stack that
//! carries the same bands.

pub mod bioclim;
pub mod maxent;

pub use bioclim::{Bioclim, BioclimModel};
pub use maxent::{MaxEnt, MaxEntModel, MaxEntSettings};

use std::collections::HashSet;

use tracing::warn;

use crate::coords::LatLon;
use crate::error::{Result, SdmError};
use crate::grid::Grid;
use crate::layers::LayerStack;

/// Fits a presence-only model.
pub trait Estimator {
    type Model: Suitability;

    fn fit(&self, presences: &[LatLon], stack: &LayerStack) -> Result<Self::Model>;
}

/// A fitted model.
pub trait Suitability {
    /// Band names, in the order `score` expects its inputs.
    fn band_names(&self) -> &[String];

    /// Suitability for one vector of band values.
    fn score(&self, values: &[f64]) -> f64;

    /// Score at a coordinate; `Ok(None)` outside the stack or on missing data.
    fn score_at(&self, stack: &LayerStack, p: LatLon) -> Result<Option<f64>> {
        check_bands(self.band_names(), stack)?;
        Ok(stack.values_at(p).map(|v| self.score(&v)))
    }

    /// Project onto `stack`. Cells missing in any band are `NaN`.
    fn predict(&self, stack: &LayerStack) -> Result<Grid> {
        check_bands(self.band_names(), stack)?;
        let reference = stack.reference_grid();
        let mut out = Grid::new(reference.width, reference.height, reference.extent(), f32::NAN)?;
        for r in 0..out.height {
            for c in 0..out.width {
                if let Some(values) = stack.values_at_cell(r, c) {
                    out.set(r, c, self.score(&values) as f32);
                }
            }
        }
        Ok(out)
    }
}

/// Fails unless `stack` has exactly `bands`, in order.
pub fn check_bands(bands: &[String], stack: &LayerStack) -> Result<()> {
    let names = stack.band_names();
    if let Some(missing) = bands.iter().find(|b| !names.contains(&b.as_str())) {
        return Err(SdmError::UnknownBand { band: missing.clone() });
    }
    if let Some(extra) = names.iter().find(|n| !bands.iter().any(|b| b == *n)) {
        return Err(SdmError::UnknownBand { band: extra.to_string() });
    }
    if names.iter().zip(bands).any(|(n, b)| n != b) {
        return Err(SdmError::InvalidParameter("stack bands are in a different order than the model's".into()));
    }
    Ok(())
}

/// Band values at each presence, one row per distinct valid cell.
/// Presences off the stack or on missing data are skipped.
pub(crate) fn presence_features(presences: &[LatLon], stack: &LayerStack) -> Vec<Vec<f64>> {
    let grid = stack.reference_grid();
    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(presences.len());
    let mut skipped = 0usize;
    for &p in presences {
        let Some(cell) = grid.cell_of(p) else {
            skipped += 1;
            continue;
        };
        let Some(values) = stack.values_at_cell(cell.0, cell.1) else {
            skipped += 1;
            continue;
        };
        if seen.insert(cell) {
            rows.push(values);
        }
    }
    if skipped > 0 {
        warn!(skipped, "presences without environmental data were ignored");
    }
    rows
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Scores a point by the value of one band, unchanged.
    pub struct BandValue {
        pub bands: Vec<String>,
        pub index: usize,
    }

    impl Suitability for BandValue {
        fn band_names(&self) -> &[String] {
            &self.bands
        }

        fn score(&self, values: &[f64]) -> f64 {
            values[self.index]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::BandValue;
    use super::*;
    use crate::coords::BoundingBox;
    use crate::layers::Band;

    fn stack() -> LayerStack {
        let extent = BoundingBox::new(0.0, 4.0, 0.0, 4.0).unwrap();
        let mut a = Grid::new(4, 4, extent, 0.0).unwrap();
        for r in 0..4 {
            for c in 0..4 {
                a.set(r, c, (r * 4 + c) as f32);
            }
        }
        a.set(2, 2, f32::NAN);
        let b = Grid::new(4, 4, extent, 5.0).unwrap();
        LayerStack::new(vec![Band { name: "bio1".into(), grid: a }, Band { name: "bio12".into(), grid: b }]).unwrap()
    }

    fn model() -> BandValue {
        BandValue { bands: vec!["bio1".into(), "bio12".into()], index: 0 }
    }

    #[test]
    fn predict_keeps_geometry_and_missing_cells() {
        let s = stack();
        let out = model().predict(&s).unwrap();
        assert!(out.same_geometry(s.reference_grid()));
        assert!(out.get(2, 2).is_nan());
        assert_eq!(out.get(3, 1), 13.0);
    }

    #[test]
    fn predict_rejects_other_band_sets() {
        let s = stack().select(&["bio12"]).unwrap();
        assert!(matches!(model().predict(&s), Err(SdmError::UnknownBand { band }) if band == "bio1"));
        let reordered = stack().select(&["bio12", "bio1"]).unwrap();
        assert!(matches!(model().predict(&reordered), Err(SdmError::InvalidParameter(_))));
    }

    #[test]
    fn score_at_outside_is_none() {
        let s = stack();
        assert_eq!(model().score_at(&s, LatLon::new(0.5, 1.5)).unwrap(), Some(1.0));
        assert_eq!(model().score_at(&s, LatLon::new(9.0, 9.0)).unwrap(), None);
        assert_eq!(model().score_at(&s, LatLon::new(2.5, 2.5)).unwrap(), None);
    }

    #[test]
    fn presence_features_dedups_cells() {
        let s = stack();
        let rows = presence_features(
            &[LatLon::new(0.2, 0.2), LatLon::new(0.8, 0.8), LatLon::new(2.5, 2.5), LatLon::new(1.5, 0.5)],
            &s,
        );
        assert_eq!(rows, vec![vec![0.0, 5.0], vec![4.0, 5.0]]);
    }
}
