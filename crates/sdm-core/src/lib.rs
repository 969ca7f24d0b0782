//! Species distribution modelling core.
//!
//! Occurrence cleaning, environmental stack selection and cropping, k-fold
//! partitioning, presence-only model fitting behind the [`model::Estimator`]
//! trait, ROC evaluation against pseudo-absences, and present/future scenario
//! comparison.

pub mod background;
pub mod coords;
pub mod error;
pub mod evaluate;
pub mod grid;
pub mod io;
pub mod layers;
pub mod model;
pub mod occurrence;
pub mod partition;
pub mod pipeline;
pub mod provider;
mod rng;
pub mod scenario;

pub use coords::{BoundingBox, LatLon};
pub use error::{Result, SdmError};
pub use evaluate::{evaluate, roc_auc, Evaluation, RocPoint};
pub use grid::{Grid, GridSummary};
pub use layers::{Band, LayerStack};
pub use occurrence::{OccurrenceRecord, OccurrenceSet, RawOccurrence};
pub use partition::{partition, FoldAssignment, Partition};
pub use pipeline::{run_configured, PipelineConfig, RunReport, SdmPipeline};
