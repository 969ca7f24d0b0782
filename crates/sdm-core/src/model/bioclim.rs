//! Percentile climate-envelope estimator.
//!
//! For each band the empirical CDF F_j of presence values is kept. A point
//! scores
//!   s(x) = 2 · min_j  min(F_j(x_j), 1 − F_j(x_j))
//! so the envelope median scores 1 and values outside the presence range 0.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{presence_features, Estimator, Suitability};
use crate::coords::LatLon;
use crate::error::{Result, SdmError};
use crate::layers::LayerStack;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Bioclim {
    /// Fewest distinct presence cells accepted.
    pub min_presences: usize,
}

impl Default for Bioclim {
    fn default() -> Self {
        Self { min_presences: 2 }
    }
}

/// Sorted presence values per band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BioclimModel {
    bands: Vec<String>,
    sorted: Vec<Vec<f64>>,
}

impl Estimator for Bioclim {
    type Model = BioclimModel;

    fn fit(&self, presences: &[LatLon], stack: &LayerStack) -> Result<BioclimModel> {
        let rows = presence_features(presences, stack);
        if rows.len() < self.min_presences.max(1) {
            return Err(SdmError::ModelFit(format!(
                "{} distinct presence cells with data, need at least {}",
                rows.len(),
                self.min_presences
            )));
        }
        let n_bands = stack.bands().len();
        let sorted: Vec<Vec<f64>> = (0..n_bands)
            .map(|j| {
                let mut col: Vec<f64> = rows.iter().map(|r| r[j]).collect();
                col.sort_by(f64::total_cmp);
                col
            })
            .collect();
        info!(presences = rows.len(), bands = n_bands, "fitted bioclim envelope");
        Ok(BioclimModel { bands: stack.band_names().iter().map(|b| b.to_string()).collect(), sorted })
    }
}

impl Suitability for BioclimModel {
    fn band_names(&self) -> &[String] {
        &self.bands
    }

    fn score(&self, values: &[f64]) -> f64 {
        let tail = self
            .sorted
            .iter()
            .zip(values)
            .map(|(col, &x)| {
                let below = col.partition_point(|&v| v <= x) as f64 / col.len() as f64;
                below.min(1.0 - below)
            })
            .fold(f64::INFINITY, f64::min);
        (2.0 * tail).clamp(0.0, 1.0)
    }
}
