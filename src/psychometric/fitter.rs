use crate::config::{StudyConfig, linear_from_db};
use crate::error::Error;
use crate::psychometric::model::{NPARAMS, PsychometricParams, WeibullPsychometric};
use crate::psychometric::posterior::PosteriorGrid;
use crate::trial::OutcomeCounts;
use crate::types::ArrayRef1;

use cobyla::{Func, RhoBeg, StopTols, minimize};
use ndarray::Array1;
use ordered_float::NotNan;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Box bounds on the psychometric parameters, in model parameter order.
///
/// A dimension whose lower and upper bound coincide is held fixed and excluded from
/// the optimizer's search vector. In the present study only the threshold dimension
/// is free; widening the slope bounds re-enables slope search with no API change.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FitBounds {
    pub lower: [f64; NPARAMS],
    pub upper: [f64; NPARAMS],
}

impl FitBounds {
    pub fn new(lower: [f64; NPARAMS], upper: [f64; NPARAMS]) -> Self {
        for i in 0..NPARAMS {
            assert!(
                lower[i].is_finite() && upper[i].is_finite(),
                "bounds must be finite"
            );
            assert!(lower[i] <= upper[i], "lower bound above upper bound");
        }
        Self { lower, upper }
    }

    /// Study bounds: threshold free over the staircase's decibel range, the other
    /// three parameters pinned to their configured values.
    pub fn from_config(config: &StudyConfig) -> Self {
        let (lo_db, hi_db) = config.threshold_bounds_db();
        Self::new(
            [lo_db, config.slope, config.guess_rate, config.lapse_rate],
            [hi_db, config.slope, config.guess_rate, config.lapse_rate],
        )
    }

    #[inline]
    fn is_free(&self, i: usize) -> bool {
        self.lower[i] < self.upper[i]
    }

    fn clamp(&self, mut x: [f64; NPARAMS]) -> [f64; NPARAMS] {
        for i in 0..NPARAMS {
            x[i] = x[i].clamp(self.lower[i], self.upper[i]);
        }
        x
    }

    /// True when every free dimension sits inside its bounds with a margin and every
    /// fixed dimension equals its pinned value.
    ///
    /// An estimate pinned to the edge of the staircase range is not usable: the true
    /// threshold lies at or beyond the measurable range, so the fit is rejected.
    fn admits(&self, x: &[f64; NPARAMS]) -> bool {
        for i in 0..NPARAMS {
            if self.is_free(i) {
                let margin = 1e-3 * (self.upper[i] - self.lower[i]);
                if x[i] <= self.lower[i] + margin || x[i] >= self.upper[i] - margin {
                    return false;
                }
            } else if x[i] != self.lower[i] {
                return false;
            }
        }
        true
    }
}

/// Binomial negative log-likelihood of per-level outcome counts under the Weibull
/// psychometric model.
///
/// Probabilities are clamped away from 0 and 1 so the value stays finite for any
/// parameter vector the optimizer probes.
fn negative_log_likelihood(counts: &OutcomeCounts, params: &PsychometricParams) -> f64 {
    const P_EPS: f64 = 1e-9;
    let mut nll = 0.0;
    for (level_db, n, k) in counts.iter() {
        let p = WeibullPsychometric::probability(level_db, params).clamp(P_EPS, 1.0 - P_EPS);
        nll -= f64::from(k) * f64::ln(p) + f64::from(n - k) * f64::ln_1p(-p);
    }
    nll
}

/// Constrained maximum-likelihood refinement of a staircase's MAP estimate.
///
/// COBYLA (a derivative-free constrained optimizer) minimizes the negative
/// log-likelihood of the aggregated outcome counts, starting from the posterior's
/// arg-max and bounded by [FitBounds]. Derivative-free search is deliberate: the
/// likelihood surface of a handful of binomial levels is cheap to evaluate and the
/// bounds are hard constraints.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct PsychometricFitter {
    /// Maximum number of likelihood evaluations.
    pub niterations: u32,
    /// Initial parameter step, decibels.
    pub rhobeg: NotNan<f64>,
    /// Relative tolerance on the likelihood for convergence.
    pub ftol_rel: NotNan<f64>,
}

impl PsychometricFitter {
    pub fn new(niterations: u32, rhobeg: f64, ftol_rel: f64) -> Self {
        assert!(niterations > 0, "niterations must be positive");
        assert!(rhobeg > 0.0, "rhobeg must be positive");
        assert!(rhobeg.is_finite(), "rhobeg must be finite");
        assert!(ftol_rel >= 0.0, "ftol_rel must be non-negative");
        assert!(ftol_rel.is_finite(), "ftol_rel must be finite");
        Self {
            niterations,
            rhobeg: NotNan::new(rhobeg).expect("rhobeg must be finite and not NaN"),
            ftol_rel: NotNan::new(ftol_rel).expect("ftol_rel must be finite and not NaN"),
        }
    }

    #[inline]
    pub fn default_niterations() -> u32 {
        1000
    }

    #[inline]
    pub fn default_rhobeg() -> f64 {
        2.0
    }

    #[inline]
    pub fn default_ftol_rel() -> f64 {
        1e-8
    }

    /// Fit one (participant, frequency) cell.
    ///
    /// Seeds from the posterior's MAP estimate (clamped into bounds), refines the
    /// free parameters, and validates the result. Any non-convergence, non-finite
    /// likelihood, or bound violation surfaces as [Error::FitFailed]; the seed is
    /// never silently returned.
    pub fn fit(
        &self,
        counts: &OutcomeCounts,
        posterior: &PosteriorGrid,
        bounds: &FitBounds,
    ) -> Result<FittedPsychometric, Error> {
        if counts.is_empty() {
            return Err(Error::FitFailed("no trials to fit"));
        }

        let seed = bounds.clamp(posterior.map_estimate().to_array());
        let free: Vec<usize> = (0..NPARAMS).filter(|&i| bounds.is_free(i)).collect();

        let (x, fmin, converged) = if free.is_empty() {
            let params = PsychometricParams::from_array(seed);
            (seed, negative_log_likelihood(counts, &params), true)
        } else {
            let objective = {
                let counts = counts.clone();
                let free = free.clone();
                move |x: &[f64], _user_data: &mut ()| -> f64 {
                    let mut full = seed;
                    for (&i, &v) in free.iter().zip(x.iter()) {
                        full[i] = v;
                    }
                    negative_log_likelihood(&counts, &PsychometricParams::from_array(full))
                }
            };

            let x0: Vec<f64> = free.iter().map(|&i| seed[i]).collect();
            let cobyla_bounds: Vec<(f64, f64)> = free
                .iter()
                .map(|&i| (bounds.lower[i], bounds.upper[i]))
                .collect();
            let constraints: Vec<&dyn Func<()>> = vec![];
            let stop_tol = StopTols {
                ftol_rel: self.ftol_rel.into(),
                ..StopTols::default()
            };

            let result = minimize(
                objective,
                &x0,
                &cobyla_bounds,
                &constraints,
                (),
                self.niterations as usize,
                RhoBeg::All(self.rhobeg.into()),
                Some(stop_tol),
            );

            let embed = |x_vec: Vec<f64>| {
                let mut full = seed;
                for (&i, v) in free.iter().zip(x_vec) {
                    full[i] = v;
                }
                full
            };
            match result {
                Ok((status, x_vec, f)) => {
                    let converged = matches!(
                        status,
                        cobyla::SuccessStatus::Success
                            | cobyla::SuccessStatus::FtolReached
                            | cobyla::SuccessStatus::XtolReached
                    );
                    (embed(x_vec), f, converged)
                }
                Err((_status, x_vec, f)) => (embed(x_vec), f, false),
            }
        };

        if !converged {
            return Err(Error::FitFailed("optimizer did not converge"));
        }
        if !fmin.is_finite() || x.iter().any(|v| !v.is_finite()) {
            return Err(Error::FitFailed("non-finite likelihood"));
        }
        if !bounds.admits(&x) {
            return Err(Error::FitFailed("estimate pinned to a bound"));
        }

        Ok(FittedPsychometric {
            params: PsychometricParams::from_array(x),
            neg_log_likelihood: fmin,
            n_trials: counts.total_trials(),
        })
    }
}

impl Default for PsychometricFitter {
    fn default() -> Self {
        Self::new(
            Self::default_niterations(),
            Self::default_rhobeg(),
            Self::default_ftol_rel(),
        )
    }
}

/// A fitted psychometric function for one (participant, frequency) cell.
///
/// Immutable once produced; refitting a prefix during replay produces a new instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FittedPsychometric {
    params: PsychometricParams,
    neg_log_likelihood: f64,
    n_trials: u32,
}

impl FittedPsychometric {
    pub fn params(&self) -> &PsychometricParams {
        &self.params
    }

    pub fn neg_log_likelihood(&self) -> f64 {
        self.neg_log_likelihood
    }

    pub fn n_trials(&self) -> u32 {
        self.n_trials
    }

    /// Detection probability at one stimulus level, decibels.
    pub fn probability(&self, level_db: f64) -> f64 {
        WeibullPsychometric::probability(level_db, &self.params)
    }

    /// Vectorized [Self::probability] over an array of levels.
    pub fn probabilities(&self, levels_db: &ArrayRef1<f64>) -> Array1<f64> {
        WeibullPsychometric::probabilities(levels_db, &self.params)
    }

    /// Visibility threshold as linear modulation depth.
    ///
    /// Strictly inside the staircase's linear modulation range whenever the fit
    /// succeeded, because [FitBounds] rejects estimates on the range edge.
    pub fn visibility_threshold(&self) -> f64 {
        linear_from_db(self.params.threshold_db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::Trial;

    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    const STUDY_SLOPE: f64 = 3.0;
    const STUDY_GUESS: f64 = 0.5;
    const STUDY_LAPSE: f64 = 0.02;

    fn study_bounds() -> FitBounds {
        FitBounds::new(
            [-60.0, STUDY_SLOPE, STUDY_GUESS, STUDY_LAPSE],
            [0.0, STUDY_SLOPE, STUDY_GUESS, STUDY_LAPSE],
        )
    }

    fn params(threshold_db: f64) -> PsychometricParams {
        PsychometricParams::new(threshold_db, STUDY_SLOPE, STUDY_GUESS, STUDY_LAPSE)
    }

    /// Flat-ish posterior peaked a few dB away from the truth, so refinement has
    /// real work to do.
    fn posterior_peaked_at(threshold_db: f64) -> PosteriorGrid {
        let domain: Vec<_> = (0..61).map(|i| params(-60.0 + i as f64)).collect();
        let weights: Array1<f64> = domain
            .iter()
            .map(|p| f64::exp(-0.5 * (p.threshold_db - threshold_db).powi(2) / 9.0))
            .collect();
        PosteriorGrid::new(weights, domain)
    }

    /// Noise-free counts generated exactly from the model at the given threshold.
    fn synthetic_counts(threshold_db: f64, levels_db: &[f64], n_per_level: u32) -> OutcomeCounts {
        let truth = params(threshold_db);
        let mut trials = Vec::new();
        for &level in levels_db {
            let p = WeibullPsychometric::probability(level, &truth);
            let k = (p * f64::from(n_per_level)).round() as u32;
            for i in 0..n_per_level {
                trials.push(Trial {
                    level_db: level,
                    detected: i < k,
                });
            }
        }
        OutcomeCounts::from_trials(&trials)
    }

    #[test]
    fn recovers_known_threshold() {
        let counts = synthetic_counts(-20.0, &[-32.0, -26.0, -20.0, -14.0, -8.0], 50);
        let fitter = PsychometricFitter::default();
        let fitted = fitter
            .fit(&counts, &posterior_peaked_at(-25.0), &study_bounds())
            .unwrap();
        assert_abs_diff_eq!(fitted.params().threshold_db, -20.0, epsilon = 0.5);
    }

    #[test]
    fn pinned_parameters_stay_pinned() {
        let counts = synthetic_counts(-20.0, &[-32.0, -26.0, -20.0, -14.0, -8.0], 50);
        let fitted = PsychometricFitter::default()
            .fit(&counts, &posterior_peaked_at(-25.0), &study_bounds())
            .unwrap();
        assert_eq!(fitted.params().slope, STUDY_SLOPE);
        assert_eq!(fitted.params().guess_rate, STUDY_GUESS);
        assert_eq!(fitted.params().lapse_rate, STUDY_LAPSE);
    }

    #[test]
    fn threshold_within_linear_range() {
        let counts = synthetic_counts(-20.0, &[-32.0, -26.0, -20.0, -14.0, -8.0], 50);
        let fitted = PsychometricFitter::default()
            .fit(&counts, &posterior_peaked_at(-25.0), &study_bounds())
            .unwrap();
        let threshold = fitted.visibility_threshold();
        assert!(threshold > linear_from_db(-60.0));
        assert!(threshold < linear_from_db(0.0));
    }

    #[test]
    fn empty_counts_fail() {
        let counts = OutcomeCounts::from_trials(&[]);
        let result =
            PsychometricFitter::default().fit(&counts, &posterior_peaked_at(-20.0), &study_bounds());
        assert!(matches!(result, Err(Error::FitFailed(_))));
    }

    #[test]
    fn all_detected_pins_to_bound_and_fails() {
        // Every trial detected at every level: the likelihood improves all the way
        // down to the lower bound, which is not a usable threshold.
        let trials: Vec<_> = [-50.0, -40.0, -30.0, -20.0, -10.0]
            .iter()
            .flat_map(|&level| {
                (0..30).map(move |_| Trial {
                    level_db: level,
                    detected: true,
                })
            })
            .collect();
        let counts = OutcomeCounts::from_trials(&trials);
        let result =
            PsychometricFitter::default().fit(&counts, &posterior_peaked_at(-55.0), &study_bounds());
        assert!(matches!(result, Err(Error::FitFailed(_))));
    }

    #[test]
    fn degenerate_bounds_evaluate_seed_only() {
        // All four dimensions pinned: the fitter just validates the seed point.
        let bounds = FitBounds::new(
            [-20.0, STUDY_SLOPE, STUDY_GUESS, STUDY_LAPSE],
            [-20.0, STUDY_SLOPE, STUDY_GUESS, STUDY_LAPSE],
        );
        let counts = synthetic_counts(-20.0, &[-26.0, -20.0, -14.0], 20);
        let fitted = PsychometricFitter::default()
            .fit(&counts, &posterior_peaked_at(-30.0), &bounds)
            .unwrap();
        assert_eq!(fitted.params().threshold_db, -20.0);
    }

    #[test]
    fn fitted_function_is_serializable() {
        let counts = synthetic_counts(-20.0, &[-32.0, -26.0, -20.0, -14.0, -8.0], 50);
        let fitted = PsychometricFitter::default()
            .fit(&counts, &posterior_peaked_at(-25.0), &study_bounds())
            .unwrap();
        let json = serde_json::to_string(&fitted).unwrap();
        let back: FittedPsychometric = serde_json::from_str(&json).unwrap();
        assert_eq!(fitted, back);
    }
}
