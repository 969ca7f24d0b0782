//! Pseudo-absence (background) sampling.
//!
//! Draws `n` distinct cells uniformly from the cells that hold data in every
//! band of a stack and returns their centres.

use rand::seq::index;
use tracing::debug;

use crate::coords::LatLon;
use crate::error::{Result, SdmError};
use crate::layers::LayerStack;
use crate::rng::rng_from_seed;

/// Default number of background points.
pub const DEFAULT_BACKGROUND_POINTS: usize = 1000;

/// Sample `n` background points without replacement. Output order follows
/// the draw order, so the same seed reproduces the same sequence.
pub fn sample_background(stack: &LayerStack, n: usize, seed: Option<u64>) -> Result<Vec<LatLon>> {
    let cells = stack.valid_cells();
    if cells.len() < n {
        return Err(SdmError::InsufficientValidCells { available: cells.len(), requested: n });
    }
    let mut rng = rng_from_seed(seed);
    let grid = stack.reference_grid();
    let points: Vec<LatLon> = index::sample(&mut rng, cells.len(), n)
        .into_iter()
        .map(|i| {
            let (r, c) = cells[i];
            grid.cell_center(r, c)
        })
        .collect();
    debug!(sampled = points.len(), valid_cells = cells.len(), "drew background points");
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::BoundingBox;
    use crate::grid::Grid;
    use crate::layers::Band;

    fn stack_with_holes() -> LayerStack {
        let extent = BoundingBox::new(-80.0, -40.0, -40.0, 0.0).unwrap();
        let mut grid = Grid::new(10, 10, extent, 1.0).unwrap();
        for c in 0..10 {
            grid.set(0, c, f32::NAN);
        }
        LayerStack::new(vec![Band { name: "bio1".into(), grid }]).unwrap()
    }

    #[test]
    fn samples_only_valid_distinct_cells() {
        let s = stack_with_holes();
        let pts = sample_background(&s, 90, Some(3)).unwrap();
        assert_eq!(pts.len(), 90);
        let grid = s.reference_grid();
        let mut cells: Vec<_> = pts.iter().map(|&p| grid.cell_of(p).unwrap()).collect();
        assert!(cells.iter().all(|&(r, _)| r != 0));
        cells.sort_unstable();
        cells.dedup();
        assert_eq!(cells.len(), 90);
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let s = stack_with_holes();
        let a = sample_background(&s, 20, Some(11)).unwrap();
        let b = sample_background(&s, 20, Some(11)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn too_many_points_requested_fails() {
        let s = stack_with_holes();
        assert!(matches!(
            sample_background(&s, 91, Some(3)),
            Err(SdmError::InsufficientValidCells { available: 90, requested: 91 })
        ));
    }
}
