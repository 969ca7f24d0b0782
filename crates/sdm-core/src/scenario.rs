//! Scenario comparison: change-in-suitability surfaces and range shifts.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdmError};
use crate::grid::Grid;

/// Default suitability threshold for presence/absence classification.
pub const DEFAULT_CHANGE_THRESHOLD: f32 = 0.5;

/// Cell counts after thresholding both surfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeChange {
    /// Unsuitable now, suitable in the future.
    pub gained: usize,
    /// Suitable now, unsuitable in the future.
    pub lost: usize,
    pub stable_suitable: usize,
    pub stable_unsuitable: usize,
}

impl RangeChange {
    /// Net change in suitable cells.
    pub fn net(&self) -> i64 {
        self.gained as i64 - self.lost as i64
    }
}

/// `future − current`, cell-wise. A cell missing in either input is missing
/// in the output.
pub fn difference(current: &Grid, future: &Grid) -> Result<Grid> {
    ensure_same_geometry(current, future)?;
    let mut out = current.clone();
    for (d, &f) in out.data.iter_mut().zip(&future.data) {
        *d = f - *d;
    }
    Ok(out)
}

/// Classify every cell valid in both surfaces as gained, lost or stable,
/// with `suitable ⇔ score ≥ threshold`.
pub fn range_change(current: &Grid, future: &Grid, threshold: f32) -> Result<RangeChange> {
    ensure_same_geometry(current, future)?;
    let mut change = RangeChange::default();
    for (&c, &f) in current.data.iter().zip(&future.data) {
        if c.is_nan() || f.is_nan() {
            continue;
        }
        match (c >= threshold, f >= threshold) {
            (false, true) => change.gained += 1,
            (true, false) => change.lost += 1,
            (true, true) => change.stable_suitable += 1,
            (false, false) => change.stable_unsuitable += 1,
        }
    }
    Ok(change)
}

fn ensure_same_geometry(a: &Grid, b: &Grid) -> Result<()> {
    if a.same_geometry(b) {
        return Ok(());
    }
    Err(SdmError::MismatchedGrid(format!(
        "{}×{} {} vs {}×{} {}",
        a.width,
        a.height,
        a.extent(),
        b.width,
        b.height,
        b.extent()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::BoundingBox;

    fn surface(values: &[f32]) -> Grid {
        let extent = BoundingBox::new(-70.0, -60.0, -20.0, -10.0).unwrap();
        Grid::from_data(values.len(), 1, extent, values.to_vec()).unwrap()
    }

    #[test]
    fn self_difference_is_zero_where_valid() {
        let g = surface(&[0.1, f32::NAN, 0.7, 0.0]);
        let d = difference(&g, &g).unwrap();
        assert_eq!(d.get(0, 0), 0.0);
        assert!(d.get(0, 1).is_nan());
        assert_eq!(d.get(0, 2), 0.0);
        assert_eq!(d.get(0, 3), 0.0);
    }

    #[test]
    fn difference_is_future_minus_current() {
        let d = difference(&surface(&[0.25, 0.5]), &surface(&[0.75, 0.0])).unwrap();
        assert_eq!(d.data, vec![0.5, -0.5]);
    }

    #[test]
    fn mismatched_grids_fail() {
        let a = surface(&[0.0, 0.0]);
        let b = surface(&[0.0, 0.0, 0.0]);
        assert!(matches!(difference(&a, &b), Err(SdmError::MismatchedGrid(_))));

        let mut shifted = a.clone();
        shifted.min_lon += 1.0;
        assert!(matches!(range_change(&a, &shifted, 0.5), Err(SdmError::MismatchedGrid(_))));
    }

    #[test]
    fn range_change_counts_transitions() {
        let current = surface(&[0.9, 0.9, 0.1, 0.1, f32::NAN]);
        let future = surface(&[0.9, 0.2, 0.6, 0.3, 0.9]);
        let c = range_change(&current, &future, 0.5).unwrap();
        assert_eq!(c, RangeChange { gained: 1, lost: 1, stable_suitable: 1, stable_unsuitable: 1 });
        assert_eq!(c.net(), 0);
    }
}
