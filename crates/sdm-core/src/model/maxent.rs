//! Maximum-entropy presence-only density estimator.
//!
//! Background: every valid cell of the training stack (subsampled to
//! `max_background` when larger). Features per band j, standardised on the
//! background:
//!   z_j = (x_j − μ_j) / σ_j         (linear)
//!   z_j²                            (quadratic, optional)
//!
//! The fitted distribution over background cells is Gibbs:
//!   q(x) = exp(λ·f(x)) / Z,  Z = Σ_bg exp(λ·f)
//! λ maximises the regularised presence log-likelihood
//!   L(λ) = mean_p(λ·f) − ln Z − (β/2)·‖λ‖²
//! by gradient ascent with step halving. Its gradient is
//!   ∇L = mean_p(f) − E_q[f] − β·λ.
//!
//! Output is the complementary log-log transform
//!   s(x) = 1 − exp(−exp(H) · q(x)),  H = −Σ q ln q
//! which lies in [0, 1].

use rand::seq::index;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{presence_features, Estimator, Suitability};
use crate::coords::LatLon;
use crate::error::{Result, SdmError};
use crate::layers::LayerStack;
use crate::rng::rng_from_seed;

/// Fitting parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxEntSettings {
    /// Maximum gradient steps.
    pub iterations: usize,
    /// Initial step size; halved whenever a step would lower L.
    pub learning_rate: f64,
    /// L2 penalty β.
    pub regularization: f64,
    /// Add z² features.
    pub quadratic: bool,
    /// Background cells used for fitting.
    pub max_background: usize,
    /// Fewest distinct presence cells accepted.
    pub min_presences: usize,
    /// Stop once every gradient component is below this.
    pub tolerance: f64,
    /// Seed for background subsampling. `run_configured` derives it from
    /// the run seed.
    pub seed: Option<u64>,
}

impl Default for MaxEntSettings {
    fn default() -> Self {
        Self {
            iterations: 500,
            learning_rate: 0.5,
            regularization: 0.01,
            quadratic: true,
            max_background: 10_000,
            min_presences: 3,
            tolerance: 1e-6,
            seed: Some(42),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MaxEnt {
    pub settings: MaxEntSettings,
}

impl MaxEnt {
    pub fn new(settings: MaxEntSettings) -> Self {
        Self { settings }
    }
}

/// Fitted maximum-entropy model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxEntModel {
    bands: Vec<String>,
    means: Vec<f64>,
    sds: Vec<f64>,
    quadratic: bool,
    lambdas: Vec<f64>,
    log_z: f64,
    entropy: f64,
}

impl MaxEntModel {
    pub fn lambdas(&self) -> &[f64] {
        &self.lambdas
    }

    pub fn entropy(&self) -> f64 {
        self.entropy
    }

    fn features(&self, values: &[f64]) -> Vec<f64> {
        expand(values, &self.means, &self.sds, self.quadratic)
    }

    /// Gibbs density relative to the fitted background, summing to 1 there.
    pub fn raw(&self, values: &[f64]) -> f64 {
        (dot(&self.lambdas, &self.features(values)) - self.log_z).exp()
    }
}

impl Suitability for MaxEntModel {
    fn band_names(&self) -> &[String] {
        &self.bands
    }

    fn score(&self, values: &[f64]) -> f64 {
        1.0 - (-self.entropy.exp() * self.raw(values)).exp()
    }
}

impl Estimator for MaxEnt {
    type Model = MaxEntModel;

    fn fit(&self, presences: &[LatLon], stack: &LayerStack) -> Result<MaxEntModel> {
        let s = &self.settings;
        let presence_rows = presence_features(presences, stack);
        if presence_rows.len() < s.min_presences {
            return Err(SdmError::ModelFit(format!(
                "{} distinct presence cells with data, need at least {}",
                presence_rows.len(),
                s.min_presences
            )));
        }

        let mut cells = stack.valid_cells();
        if cells.len() > s.max_background {
            let mut rng = rng_from_seed(s.seed);
            let sampled: Vec<(usize, usize)> = index::sample(&mut rng, cells.len(), s.max_background)
                .into_iter()
                .map(|i| cells[i])
                .collect();
            cells = sampled;
        }
        let background_rows: Vec<Vec<f64>> =
            cells.iter().filter_map(|&(r, c)| stack.values_at_cell(r, c)).collect();
        if background_rows.is_empty() {
            return Err(SdmError::ModelFit("stack has no valid background cells".into()));
        }

        let (means, sds) = column_moments(&background_rows);
        let bg: Vec<Vec<f64>> = background_rows.iter().map(|v| expand(v, &means, &sds, s.quadratic)).collect();
        let pr: Vec<Vec<f64>> = presence_rows.iter().map(|v| expand(v, &means, &sds, s.quadratic)).collect();
        let presence_mean = column_moments(&pr).0;

        let n_features = presence_mean.len();
        let mut lambdas = vec![0.0f64; n_features];
        let mut state = GibbsState::evaluate(&lambdas, &bg, &presence_mean, s.regularization);
        let mut rate = s.learning_rate;
        let mut steps = 0usize;

        for _ in 0..s.iterations {
            let grad = state.gradient(&bg, &presence_mean, &lambdas, s.regularization);
            if grad.iter().all(|g| g.abs() < s.tolerance) {
                break;
            }
            // Step halving keeps the ascent monotone.
            let mut accepted = false;
            while rate > 1e-12 {
                let candidate: Vec<f64> = lambdas.iter().zip(&grad).map(|(l, g)| l + rate * g).collect();
                let next = GibbsState::evaluate(&candidate, &bg, &presence_mean, s.regularization);
                if next.objective >= state.objective {
                    lambdas = candidate;
                    state = next;
                    accepted = true;
                    break;
                }
                rate *= 0.5;
            }
            if !accepted {
                break;
            }
            steps += 1;
        }

        if !state.objective.is_finite() {
            return Err(SdmError::ModelFit("log-likelihood diverged".into()));
        }

        let entropy = state.entropy();
        info!(
            presences = presence_rows.len(),
            background = bg.len(),
            features = n_features,
            steps,
            objective = state.objective,
            "fitted maxent model"
        );
        debug!(?lambdas, entropy, "maxent coefficients");

        Ok(MaxEntModel {
            bands: stack.band_names().iter().map(|b| b.to_string()).collect(),
            means,
            sds,
            quadratic: s.quadratic,
            lambdas,
            log_z: state.log_z,
            entropy,
        })
    }
}

// ── Gibbs distribution bookkeeping ───────────────────────────────────────────

struct GibbsState {
    /// λ·f for every background row.
    scores: Vec<f64>,
    log_z: f64,
    objective: f64,
}

impl GibbsState {
    fn evaluate(lambdas: &[f64], bg: &[Vec<f64>], presence_mean: &[f64], beta: f64) -> Self {
        let scores: Vec<f64> = bg.iter().map(|f| dot(lambdas, f)).collect();
        let log_z = log_sum_exp(&scores);
        let penalty = 0.5 * beta * dot(lambdas, lambdas);
        let objective = dot(lambdas, presence_mean) - log_z - penalty;
        Self { scores, log_z, objective }
    }

    fn gradient(&self, bg: &[Vec<f64>], presence_mean: &[f64], lambdas: &[f64], beta: f64) -> Vec<f64> {
        let mut expected = vec![0.0f64; presence_mean.len()];
        for (f, &s) in bg.iter().zip(&self.scores) {
            let q = (s - self.log_z).exp();
            for (e, &v) in expected.iter_mut().zip(f) {
                *e += q * v;
            }
        }
        presence_mean
            .iter()
            .zip(&expected)
            .zip(lambdas)
            .map(|((p, e), l)| p - e - beta * l)
            .collect()
    }

    /// H = −Σ q ln q = ln Z − Σ q·(λ·f).
    fn entropy(&self) -> f64 {
        let expected_score: f64 = self.scores.iter().map(|&s| (s - self.log_z).exp() * s).sum();
        self.log_z - expected_score
    }
}

// ── Math helpers ──────────────────────────────────────────────────────────────

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn log_sum_exp(v: &[f64]) -> f64 {
    let max = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + v.iter().map(|&x| (x - max).exp()).sum::<f64>().ln()
}

/// Per-column mean and standard deviation. A zero deviation becomes 1 so that
/// constant columns standardise to 0 instead of NaN.
fn column_moments(rows: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
    let n = rows.len() as f64;
    let cols = rows.first().map_or(0, Vec::len);
    let mut means = vec![0.0f64; cols];
    for row in rows {
        for (m, v) in means.iter_mut().zip(row) {
            *m += v / n;
        }
    }
    let mut sds = vec![0.0f64; cols];
    for row in rows {
        for ((s, v), m) in sds.iter_mut().zip(row).zip(&means) {
            *s += (v - m) * (v - m) / n;
        }
    }
    for s in &mut sds {
        *s = s.sqrt();
        if *s < 1e-12 {
            *s = 1.0;
        }
    }
    (means, sds)
}

fn expand(values: &[f64], means: &[f64], sds: &[f64], quadratic: bool) -> Vec<f64> {
    let z: Vec<f64> = values.iter().zip(means).zip(sds).map(|((v, m), s)| (v - m) / s).collect();
    if !quadratic {
        return z;
    }
    let mut f = z.clone();
    f.extend(z.iter().map(|x| x * x));
    f
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::BoundingBox;
    use crate::grid::Grid;
    use crate::layers::Band;
    use approx::assert_relative_eq;

    /// 20×20 stack over lon 0..20, lat 0..20.
    /// bio1 rises west → east (0..19), bio12 rises south → north.
    fn gradient_stack() -> LayerStack {
        let extent = BoundingBox::new(0.0, 20.0, 0.0, 20.0).unwrap();
        let mut t = Grid::new(20, 20, extent, 0.0).unwrap();
        let mut p = Grid::new(20, 20, extent, 0.0).unwrap();
        for r in 0..20 {
            for c in 0..20 {
                t.set(r, c, c as f32);
                p.set(r, c, 100.0 + r as f32 * 10.0);
            }
        }
        LayerStack::new(vec![Band { name: "bio1".into(), grid: t }, Band { name: "bio12".into(), grid: p }])
            .unwrap()
    }

    fn eastern_presences() -> Vec<LatLon> {
        (0..20).flat_map(|r| (16..20).map(move |c| LatLon::new(r as f64 + 0.5, c as f64 + 0.5))).collect()
    }

    #[test]
    fn fit_prefers_presence_environment() {
        let stack = gradient_stack();
        let model = MaxEnt::default().fit(&eastern_presences(), &stack).unwrap();
        let east = model.score(&[18.0, 200.0]);
        let west = model.score(&[1.0, 200.0]);
        assert!(east > west, "east {east} should beat west {west}");
        assert!((0.0..=1.0).contains(&east));
        assert!((0.0..=1.0).contains(&west));
    }

    #[test]
    fn raw_sums_to_one_over_background() {
        let stack = gradient_stack();
        let model = MaxEnt::default().fit(&eastern_presences(), &stack).unwrap();
        let total: f64 = stack
            .valid_cells()
            .iter()
            .map(|&(r, c)| model.raw(&stack.values_at_cell(r, c).unwrap()))
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn fit_is_deterministic() {
        let stack = gradient_stack();
        let a = MaxEnt::default().fit(&eastern_presences(), &stack).unwrap();
        let b = MaxEnt::default().fit(&eastern_presences(), &stack).unwrap();
        assert_eq!(a.lambdas(), b.lambdas());
    }

    #[test]
    fn too_few_presences_is_a_fit_error() {
        let stack = gradient_stack();
        let pts = vec![LatLon::new(0.5, 0.5), LatLon::new(0.6, 0.6)];
        assert!(matches!(MaxEnt::default().fit(&pts, &stack), Err(SdmError::ModelFit(_))));
    }

    #[test]
    fn predict_covers_stack() {
        let stack = gradient_stack();
        let model = MaxEnt::default().fit(&eastern_presences(), &stack).unwrap();
        let surface = model.predict(&stack).unwrap();
        assert_eq!(surface.valid_count(), 400);
        let s = surface.summary().unwrap();
        assert!(s.min >= 0.0 && s.max <= 1.0);
    }

    #[test]
    fn log_sum_exp_is_stable() {
        assert_relative_eq!(log_sum_exp(&[1000.0, 1000.0]), 1000.0 + 2f64.ln());
    }
}
