//! Discrimination scoring: ROC curve and AUC from presence vs. background.
//!
//! Every distinct score is a threshold t, swept from high to low:
//!   TPR(t) = |{presence ≥ t}| / |presence|
//!   FPR(t) = |{background ≥ t}| / |background|
//! The curve starts at (0, 0) and ends at (1, 1); AUC is the trapezoidal
//! area under TPR over FPR. Ties contribute a diagonal segment, so a model
//! with one constant score gets exactly 0.5.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::coords::LatLon;
use crate::error::{Result, SdmError};
use crate::layers::LayerStack;
use crate::model::Suitability;

/// One point on the ROC curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    pub fpr: f64,
    pub tpr: f64,
    /// Score threshold producing this point; None for the origin.
    pub threshold: Option<f64>,
}

/// ROC curve, AUC and the threshold maximising the true skill statistic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub auc: f64,
    pub roc: Vec<RocPoint>,
    /// Threshold maximising TSS = TPR − FPR.
    pub best_threshold: f64,
    pub max_tss: f64,
    pub n_presence: usize,
    pub n_background: usize,
    /// Held-out presences dropped for lack of data (off-grid or missing cell).
    #[serde(default)]
    pub skipped_presence: usize,
    #[serde(default)]
    pub skipped_background: usize,
}

impl Evaluation {
    /// `(fpr, tpr)` pairs in curve order.
    pub fn curve(&self) -> Vec<(f64, f64)> {
        self.roc.iter().map(|p| (p.fpr, p.tpr)).collect()
    }
}

/// Build the ROC curve from raw scores. NaN scores are rejected.
pub fn roc_auc(presence: &[f64], background: &[f64]) -> Result<Evaluation> {
    if presence.is_empty() {
        return Err(SdmError::EmptyInput("no presence scores to evaluate".into()));
    }
    if background.is_empty() {
        return Err(SdmError::EmptyInput("no background scores to evaluate".into()));
    }
    if presence.iter().chain(background).any(|s| s.is_nan()) {
        return Err(SdmError::InvalidParameter("scores must not be NaN".into()));
    }

    // (score, is_presence), descending by score.
    let mut all: Vec<(f64, bool)> = presence
        .iter()
        .map(|&s| (s, true))
        .chain(background.iter().map(|&s| (s, false)))
        .collect();
    all.sort_by(|a, b| b.0.total_cmp(&a.0));

    let n_p = presence.len() as f64;
    let n_b = background.len() as f64;
    let mut roc = vec![RocPoint { fpr: 0.0, tpr: 0.0, threshold: None }];
    let (mut tp, mut fp) = (0usize, 0usize);
    let mut auc = 0.0f64;
    let mut best = (f64::NEG_INFINITY, f64::INFINITY);

    let mut i = 0;
    while i < all.len() {
        let t = all[i].0;
        while i < all.len() && all[i].0 == t {
            if all[i].1 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let point = RocPoint { fpr: fp as f64 / n_b, tpr: tp as f64 / n_p, threshold: Some(t) };
        let prev = roc[roc.len() - 1];
        auc += (point.fpr - prev.fpr) * (point.tpr + prev.tpr) / 2.0;
        let tss = point.tpr - point.fpr;
        if tss > best.0 {
            best = (tss, t);
        }
        roc.push(point);
    }

    Ok(Evaluation {
        auc,
        roc,
        best_threshold: best.1,
        max_tss: best.0,
        n_presence: presence.len(),
        n_background: background.len(),
        skipped_presence: 0,
        skipped_background: 0,
    })
}

/// Score held-out presences and background points with `model` on `stack`
/// and build the ROC curve. Points without data are skipped with a warning.
pub fn evaluate<M: Suitability + ?Sized>(
    model: &M,
    test: &[LatLon],
    background: &[LatLon],
    stack: &LayerStack,
) -> Result<Evaluation> {
    let presence_scores = score_points(model, test, stack)?;
    let background_scores = score_points(model, background, stack)?;
    let skipped_presence = test.len() - presence_scores.len();
    let skipped_background = background.len() - background_scores.len();
    if skipped_presence > 0 {
        warn!(skipped = skipped_presence, "held-out presences without data");
    }
    if skipped_background > 0 {
        warn!(skipped = skipped_background, "background points without data");
    }
    let eval = Evaluation {
        skipped_presence,
        skipped_background,
        ..roc_auc(&presence_scores, &background_scores)?
    };
    info!(
        auc = eval.auc,
        presence = eval.n_presence,
        background = eval.n_background,
        "evaluated model"
    );
    Ok(eval)
}

fn score_points<M: Suitability + ?Sized>(model: &M, points: &[LatLon], stack: &LayerStack) -> Result<Vec<f64>> {
    let mut scores = Vec::with_capacity(points.len());
    for &p in points {
        if let Some(s) = model.score_at(stack, p)? {
            scores.push(s);
        }
    }
    Ok(scores)
}
