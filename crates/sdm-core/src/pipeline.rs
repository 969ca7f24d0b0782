//! Pipeline orchestrator: runs all modelling stages in order.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::background::{sample_background, DEFAULT_BACKGROUND_POINTS};
use crate::coords::{BoundingBox, LatLon};
use crate::error::{Result, SdmError};
use crate::evaluate::{evaluate, Evaluation};
use crate::grid::{Grid, GridSummary};
use crate::layers::LayerStack;
use crate::model::{Bioclim, Estimator, MaxEnt, MaxEntSettings, Suitability};
use crate::occurrence::{OccurrenceSet, RawOccurrence};
use crate::partition::FoldAssignment;
use crate::scenario::{difference, range_change, RangeChange, DEFAULT_CHANGE_THRESHOLD};

/// Seed offsets so that folds, background draws and model fitting are not correlated.
const FOLD_SEED_SALT: u64 = 0x5A5A;
const BACKGROUND_SEED_SALT: u64 = 0xB6B6;
const FIT_SEED_SALT: u64 = 0xF17F;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Which estimator fits the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelConfig {
    #[serde(rename = "maxent")]
    MaxEnt(MaxEntSettings),
    Bioclim(Bioclim),
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::MaxEnt(MaxEntSettings::default())
    }
}

impl ModelConfig {
    /// Replace any estimator seed with `seed`. Bioclim draws nothing.
    pub fn seeded(self, seed: Option<u64>) -> Self {
        match self {
            ModelConfig::MaxEnt(settings) => ModelConfig::MaxEnt(MaxEntSettings { seed, ..settings }),
            other => other,
        }
    }
}

/// Run parameters. Defaults reproduce the guinea-pig walkthrough: South
/// American study area, 10° buffer, WorldClim bands 8/9/18/19 dropped,
/// 5 folds with fold 1 held out, 1000 background points, seed 42.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Records must fall strictly inside this box.
    pub study_area: BoundingBox,
    /// Padding around the occurrence extent used to crop the stacks.
    pub buffer_deg: f64,
    /// Bands removed from both stacks before fitting.
    pub excluded_bands: Vec<String>,
    pub folds: usize,
    /// Held-out fold, 1-based.
    pub test_fold: usize,
    pub background_points: usize,
    /// `None` draws from OS entropy; runs are then not reproducible.
    pub seed: Option<u64>,
    pub model: ModelConfig,
    /// Suitability at or above which a cell counts as suitable.
    pub change_threshold: f32,
    /// Also hold out every fold in turn and report per-fold AUC.
    pub cross_validate: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            study_area: BoundingBox { min_lon: -135.0, max_lon: -30.0, min_lat: -60.0, max_lat: 15.0 },
            buffer_deg: 10.0,
            excluded_bands: ["bio8", "bio9", "bio18", "bio19"].iter().map(|s| s.to_string()).collect(),
            folds: 5,
            test_fold: 1,
            background_points: DEFAULT_BACKGROUND_POINTS,
            seed: Some(42),
            model: ModelConfig::default(),
            change_threshold: DEFAULT_CHANGE_THRESHOLD,
            cross_validate: false,
        }
    }
}

impl PipelineConfig {
    /// Check the parameters that serde cannot.
    pub fn validate(&self) -> Result<()> {
        let a = &self.study_area;
        BoundingBox::new(a.min_lon, a.max_lon, a.min_lat, a.max_lat)?;
        if self.folds < 2 {
            return Err(SdmError::InvalidParameter(format!("folds must be >= 2, got {}", self.folds)));
        }
        if !(1..=self.folds).contains(&self.test_fold) {
            return Err(SdmError::InvalidParameter(format!(
                "test_fold {} outside 1..={}",
                self.test_fold, self.folds
            )));
        }
        if self.background_points == 0 {
            return Err(SdmError::InvalidParameter("background_points must be > 0".into()));
        }
        if !self.buffer_deg.is_finite() || self.buffer_deg < 0.0 {
            return Err(SdmError::InvalidParameter(format!("buffer_deg must be >= 0, got {}", self.buffer_deg)));
        }
        Ok(())
    }

    fn fold_seed(&self) -> Option<u64> {
        self.seed.map(|s| s ^ FOLD_SEED_SALT)
    }

    fn background_seed(&self) -> Option<u64> {
        self.seed.map(|s| s ^ BACKGROUND_SEED_SALT)
    }

    fn fit_seed(&self) -> Option<u64> {
        self.seed.map(|s| s ^ FIT_SEED_SALT)
    }
}

// ── Outputs ───────────────────────────────────────────────────────────────────

/// Record counts after each stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub raw: usize,
    pub validated: usize,
    pub deduplicated: usize,
    pub in_study_area: usize,
    pub training: usize,
    pub test: usize,
}

/// Cleaned occurrences and the selected, cropped stacks.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub occurrences: OccurrenceSet,
    pub extent: BoundingBox,
    pub current: LayerStack,
    pub future: LayerStack,
    pub counts: StageCounts,
}

/// A suitability surface with its summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceReport {
    pub grid: Grid,
    pub summary: Option<GridSummary>,
}

impl SurfaceReport {
    fn new(grid: Grid) -> Self {
        let summary = grid.summary();
        Self { grid, summary }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidation {
    /// AUC with fold `i + 1` held out.
    pub fold_auc: Vec<f64>,
    pub mean_auc: f64,
}

/// Full output of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub counts: StageCounts,
    pub extent: BoundingBox,
    pub bands: Vec<String>,
    pub evaluation: Evaluation,
    pub cross_validation: Option<CrossValidation>,
    pub current: SurfaceReport,
    pub future: SurfaceReport,
    /// future − current.
    pub difference: SurfaceReport,
    pub range_change: RangeChange,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

/// The main pipeline orchestrator.
pub struct SdmPipeline {
    config: PipelineConfig,
}

impl SdmPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Clean occurrences and prepare both stacks.
    ///
    /// Stage order:
    ///   1. Coordinate validation
    ///   2. Exact deduplication
    ///   3. Study-area filter
    ///   4. Padded extent
    ///   5. Band exclusion (both stacks, same bands required)
    ///   6. Crop (both stacks)
    pub fn prepare(&self, raw: &[RawOccurrence], current: &LayerStack, future: &LayerStack) -> Result<PreparedData> {
        let cfg = &self.config;

        // ── 1–3. Occurrence cleaning ────────────────────────────────────────
        let validated = OccurrenceSet::validate(raw);
        let deduplicated = validated.dedup();
        let occurrences = deduplicated.within(&cfg.study_area);
        info!(
            raw = raw.len(),
            validated = validated.len(),
            deduplicated = deduplicated.len(),
            in_study_area = occurrences.len(),
            "cleaned occurrences"
        );

        // ── 4. Extent ───────────────────────────────────────────────────────
        let extent = occurrences.extent(cfg.buffer_deg)?;
        info!("crop extent {extent}");

        // ── 5. Layer selection ──────────────────────────────────────────────
        let current = current.exclude(&cfg.excluded_bands)?;
        let future = future.exclude(&cfg.excluded_bands)?;
        current.ensure_same_bands(&future)?;
        info!(bands = ?current.band_names(), "selected bands");

        // ── 6. Crop ─────────────────────────────────────────────────────────
        let current = current.crop(&extent)?;
        let future = future.crop(&extent)?;

        let counts = StageCounts {
            raw: raw.len(),
            validated: validated.len(),
            deduplicated: deduplicated.len(),
            in_study_area: occurrences.len(),
            ..StageCounts::default()
        };
        Ok(PreparedData { occurrences, extent, current, future, counts })
    }

    /// Run the full pipeline with `estimator`.
    ///
    /// After `prepare`:
    ///   7. k-fold partition, one fold held out
    ///   8. Fit on the training fold (current climate)
    ///   9. Predict current and future suitability
    ///  10. Background sampling and ROC evaluation
    ///  11. Scenario difference and range change
    pub fn run<E: Estimator>(
        &self,
        estimator: &E,
        raw: &[RawOccurrence],
        current: &LayerStack,
        future: &LayerStack,
    ) -> Result<RunReport> {
        let cfg = &self.config;
        let prepared = self.prepare(raw, current, future)?;
        let occurrences = &prepared.occurrences;

        // ── 7. Partition ────────────────────────────────────────────────────
        let assignment = FoldAssignment::new(occurrences.len(), cfg.folds, cfg.fold_seed())?;
        let split = assignment.split(occurrences, cfg.test_fold)?;
        info!(training = split.training.len(), test = split.test.len(), fold = cfg.test_fold, "partitioned");

        // ── 8. Fit ──────────────────────────────────────────────────────────
        let model = estimator.fit(&split.training.coordinates(), &prepared.current)?;

        // ── 9. Predict ──────────────────────────────────────────────────────
        let current_surface = model.predict(&prepared.current)?;
        let future_surface = model.predict(&prepared.future)?;

        // ── 10. Evaluate ────────────────────────────────────────────────────
        let background = sample_background(&prepared.current, cfg.background_points, cfg.background_seed())?;
        let evaluation = evaluate(&model, &split.test.coordinates(), &background, &prepared.current)?;

        let cross_validation = if cfg.cross_validate {
            Some(self.cross_validate(estimator, occurrences, &assignment, &background, &prepared.current)?)
        } else {
            None
        };

        // ── 11. Scenario comparison ─────────────────────────────────────────
        let diff = difference(&current_surface, &future_surface)?;
        let change = range_change(&current_surface, &future_surface, cfg.change_threshold)?;
        info!(
            gained = change.gained,
            lost = change.lost,
            net = change.net(),
            threshold = cfg.change_threshold,
            "range change"
        );

        let counts = StageCounts { training: split.training.len(), test: split.test.len(), ..prepared.counts };
        Ok(RunReport {
            counts,
            extent: prepared.extent,
            bands: model.band_names().to_vec(),
            evaluation,
            cross_validation,
            current: SurfaceReport::new(current_surface),
            future: SurfaceReport::new(future_surface),
            difference: SurfaceReport::new(diff),
            range_change: change,
        })
    }

    /// Hold out each fold in turn against the shared background set.
    fn cross_validate<E: Estimator>(
        &self,
        estimator: &E,
        occurrences: &OccurrenceSet,
        assignment: &FoldAssignment,
        background: &[LatLon],
        stack: &LayerStack,
    ) -> Result<CrossValidation> {
        let mut fold_auc = Vec::with_capacity(assignment.k());
        for fold in 1..=assignment.k() {
            let split = assignment.split(occurrences, fold)?;
            let model = estimator.fit(&split.training.coordinates(), stack)?;
            let eval = evaluate(&model, &split.test.coordinates(), background, stack)?;
            fold_auc.push(eval.auc);
        }
        let mean_auc = fold_auc.iter().sum::<f64>() / fold_auc.len() as f64;
        info!(?fold_auc, mean_auc, "cross-validated");
        Ok(CrossValidation { fold_auc, mean_auc })
    }
}

/// Run with the estimator named in the configuration. The estimator is
/// seeded from the run seed, so an unseeded run is random throughout.
pub fn run_configured(
    config: PipelineConfig,
    raw: &[RawOccurrence],
    current: &LayerStack,
    future: &LayerStack,
) -> Result<RunReport> {
    let model = config.model.clone().seeded(config.fit_seed());
    let pipeline = SdmPipeline::new(config)?;
    match model {
        ModelConfig::MaxEnt(settings) => pipeline.run(&MaxEnt::new(settings), raw, current, future),
        ModelConfig::Bioclim(bioclim) => pipeline.run(&bioclim, raw, current, future),
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.folds, 5);
        assert_eq!(cfg.background_points, 1000);
    }

    #[test]
    fn config_json_fills_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(r#"{"folds": 4, "model": {"kind": "bioclim"}}"#).unwrap();
        assert_eq!(cfg.folds, 4);
        assert_eq!(cfg.buffer_deg, 10.0);
        assert!(matches!(cfg.model, ModelConfig::Bioclim(_)));
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let bad_fold = PipelineConfig { test_fold: 6, ..PipelineConfig::default() };
        assert!(SdmPipeline::new(bad_fold).is_err());

        let bad_area = PipelineConfig {
            study_area: BoundingBox { min_lon: 10.0, max_lon: 0.0, min_lat: 0.0, max_lat: 1.0 },
            ..PipelineConfig::default()
        };
        assert!(matches!(bad_area.validate(), Err(SdmError::InvalidBoundingBox(_))));
    }

    #[test]
    fn seeds_are_salted_per_stage() {
        let cfg = PipelineConfig::default();
        assert_ne!(cfg.fold_seed(), cfg.background_seed());
        assert_ne!(cfg.fit_seed(), cfg.fold_seed());
        assert_ne!(cfg.fit_seed(), cfg.background_seed());
        let unseeded = PipelineConfig { seed: None, ..cfg };
        assert_eq!(unseeded.fold_seed(), None);
        assert_eq!(unseeded.fit_seed(), None);
    }

    #[test]
    fn run_seed_overrides_estimator_seed() {
        let cfg = PipelineConfig { seed: Some(7), ..PipelineConfig::default() };
        match cfg.model.clone().seeded(cfg.fit_seed()) {
            ModelConfig::MaxEnt(s) => assert_eq!(s.seed, Some(7 ^ FIT_SEED_SALT)),
            other => panic!("expected maxent, got {other:?}"),
        }
        match cfg.model.clone().seeded(None) {
            ModelConfig::MaxEnt(s) => assert_eq!(s.seed, None),
            other => panic!("expected maxent, got {other:?}"),
        }
        assert!(matches!(
            ModelConfig::Bioclim(Bioclim::default()).seeded(Some(1)),
            ModelConfig::Bioclim(_)
        ));
    }
}
