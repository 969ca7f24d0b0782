//! Environmental data providers.
//!
//! A provider resolves a climate scenario (dataset, resolution, baseline or
//! future projection) to a layer stack. The pipeline only sees the trait.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::io::load_stack;
use crate::layers::LayerStack;

/// Which climate the stack describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Projection {
    Baseline,
    Future {
        /// General circulation model, e.g. `MIROC6`.
        gcm: String,
        /// Emission pathway, e.g. `ssp585`.
        pathway: String,
        /// Period label, e.g. `2061-2080`.
        period: String,
    },
}

/// A request for one environmental stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClimateScenario {
    /// Dataset name, e.g. `worldclim`.
    pub dataset: String,
    /// Resolution label, e.g. `10m`.
    pub resolution: String,
    pub projection: Projection,
}

impl ClimateScenario {
    pub fn baseline(dataset: &str, resolution: &str) -> Self {
        Self { dataset: dataset.into(), resolution: resolution.into(), projection: Projection::Baseline }
    }

    pub fn future(dataset: &str, resolution: &str, gcm: &str, pathway: &str, period: &str) -> Self {
        Self {
            dataset: dataset.into(),
            resolution: resolution.into(),
            projection: Projection::Future { gcm: gcm.into(), pathway: pathway.into(), period: period.into() },
        }
    }

    /// File-name friendly tag, e.g. `worldclim_10m_current` or
    /// `worldclim_10m_MIROC6_ssp585_2061-2080`.
    pub fn tag(&self) -> String {
        match &self.projection {
            Projection::Baseline => format!("{}_{}_current", self.dataset, self.resolution),
            Projection::Future { gcm, pathway, period } => {
                format!("{}_{}_{gcm}_{pathway}_{period}", self.dataset, self.resolution)
            }
        }
    }
}

impl fmt::Display for ClimateScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Supplies environmental stacks by scenario.
pub trait LayerProvider {
    fn fetch(&self, scenario: &ClimateScenario) -> Result<LayerStack>;
}

/// Reads `<root>/<tag>.json` stacks written by `stack_builder`.
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    pub root: PathBuf,
}

impl DirectoryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, scenario: &ClimateScenario) -> PathBuf {
        self.root.join(format!("{}.json", scenario.tag()))
    }
}

impl LayerProvider for DirectoryProvider {
    fn fetch(&self, scenario: &ClimateScenario) -> Result<LayerStack> {
        let path = self.path_for(scenario);
        let stack = load_stack(&path)?;
        info!(scenario = %scenario, bands = stack.bands().len(), "loaded {}", path.display());
        Ok(stack)
    }
}
