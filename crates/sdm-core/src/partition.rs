//! k-fold partitioning of occurrence records.
//!
//! Indices are shuffled with a seeded `StdRng` and fold ids dealt
//! round-robin, so fold sizes differ by at most one:
//!   fold(shuffled[i]) = (i mod k) + 1

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SdmError};
use crate::occurrence::OccurrenceSet;
use crate::rng::rng_from_seed;

/// Fold id (1-based) for every record index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldAssignment {
    folds: Vec<usize>,
    k: usize,
}

/// Held-out evaluation records and the training records.
#[derive(Debug, Clone)]
pub struct Partition {
    pub test: OccurrenceSet,
    pub training: OccurrenceSet,
}

impl FoldAssignment {
    /// Assign `n` records to `k` folds. `seed = None` draws from OS entropy.
    pub fn new(n: usize, k: usize, seed: Option<u64>) -> Result<Self> {
        if k < 2 {
            return Err(SdmError::InvalidParameter(format!("fold count must be >= 2, got {k}")));
        }
        if n < k {
            return Err(SdmError::InsufficientData { records: n, folds: k });
        }
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut rng_from_seed(seed));

        let mut folds = vec![0usize; n];
        for (i, &idx) in order.iter().enumerate() {
            folds[idx] = i % k + 1;
        }
        Ok(Self { folds, k })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn fold_of(&self, index: usize) -> Option<usize> {
        self.folds.get(index).copied()
    }

    pub fn folds(&self) -> &[usize] {
        &self.folds
    }

    /// Number of records in each fold, indexed by `fold - 1`.
    pub fn fold_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.k];
        for &f in &self.folds {
            sizes[f - 1] += 1;
        }
        sizes
    }

    /// Split `set` into the held-out `fold` and the remaining records.
    pub fn split(&self, set: &OccurrenceSet, fold: usize) -> Result<Partition> {
        if !(1..=self.k).contains(&fold) {
            return Err(SdmError::InvalidParameter(format!("fold {fold} outside 1..={}", self.k)));
        }
        if set.len() != self.folds.len() {
            return Err(SdmError::InvalidParameter(format!(
                "assignment covers {} records, set has {}",
                self.folds.len(),
                set.len()
            )));
        }
        let (test_idx, train_idx): (Vec<usize>, Vec<usize>) =
            (0..set.len()).partition(|&i| self.folds[i] == fold);
        Ok(Partition { test: set.subset(&test_idx), training: set.subset(&train_idx) })
    }
}

/// Assign folds and split in one step.
pub fn partition(set: &OccurrenceSet, k: usize, fold: usize, seed: Option<u64>) -> Result<Partition> {
    FoldAssignment::new(set.len(), k, seed)?.split(set, fold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::LatLon;

    fn grid_points(n: usize) -> OccurrenceSet {
        let pts: Vec<LatLon> = (0..n).map(|i| LatLon::new(-(i as f64) * 0.1, -60.0 - i as f64 * 0.1)).collect();
        OccurrenceSet::from_points(&pts)
    }

    #[test]
    fn fold_sizes_are_balanced() {
        let a = FoldAssignment::new(100, 5, Some(7)).unwrap();
        assert_eq!(a.fold_sizes(), vec![20; 5]);
        let b = FoldAssignment::new(103, 5, Some(7)).unwrap();
        let sizes = b.fold_sizes();
        assert_eq!(sizes.iter().sum::<usize>(), 103);
        assert!(sizes.iter().all(|&s| s == 20 || s == 21));
    }

    #[test]
    fn same_seed_same_assignment() {
        let a = FoldAssignment::new(50, 5, Some(42)).unwrap();
        let b = FoldAssignment::new(50, 5, Some(42)).unwrap();
        let c = FoldAssignment::new(50, 5, Some(43)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn split_is_disjoint_and_complete() {
        let set = grid_points(100);
        let p = partition(&set, 5, 1, Some(1)).unwrap();
        assert_eq!(p.test.len() + p.training.len(), 100);
        assert!((19..=21).contains(&p.test.len()));
        for r in p.test.records() {
            assert!(!p.training.records().contains(r));
        }
    }

    #[test]
    fn too_few_records_fails() {
        let set = grid_points(4);
        assert!(matches!(
            partition(&set, 5, 1, Some(1)),
            Err(SdmError::InsufficientData { records: 4, folds: 5 })
        ));
    }

    #[test]
    fn fold_out_of_range_fails() {
        let set = grid_points(10);
        assert!(partition(&set, 5, 0, Some(1)).is_err());
        assert!(partition(&set, 5, 6, Some(1)).is_err());
        assert!(partition(&set, 1, 1, Some(1)).is_err());
    }
}
