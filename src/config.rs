use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The flicker frequencies tested in the experiment, in table order.
///
/// Threshold matrices and per-participant result vectors are keyed positionally by
/// this ordering, so it must not be re-sorted.
pub const FREQUENCIES_HZ: [f64; 10] = [
    80.0, 160.0, 200.0, 300.0, 400.0, 600.0, 900.0, 1000.0, 1200.0, 1800.0,
];

/// Convert a linear modulation depth in (0, 1] to amplitude decibels.
///
/// Stimulus levels, psychometric thresholds, and fit bounds all use this 20·log10
/// convention.
#[inline]
pub fn db_from_linear(linear: f64) -> f64 {
    20.0 * f64::log10(linear)
}

/// Inverse of [db_from_linear].
#[inline]
pub fn linear_from_db(db: f64) -> f64 {
    f64::powf(10.0, db / 20.0)
}

/// Shared study constants passed explicitly into every fitting call.
///
/// The psychometric slope, guess rate, and lapse rate are fixed for the whole study;
/// the fitter receives them as degenerate bounds, so widening the bounds re-enables
/// searching them without touching this struct.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StudyConfig {
    /// Tested flicker frequencies, Hz, in table order.
    pub frequencies_hz: Vec<f64>,
    /// Psychometric slope (Weibull beta).
    pub slope: f64,
    /// Guess rate of the two-alternative forced-choice task.
    pub guess_rate: f64,
    /// Lapse rate.
    pub lapse_rate: f64,
    /// Smallest modulation depth the staircase could present, percent.
    pub modulation_min_percent: f64,
    /// Largest modulation depth the staircase could present, percent.
    pub modulation_max_percent: f64,
    /// Polynomial degree of the sensitivity curve over log frequency.
    pub tcsf_degree: usize,
    /// Per-frequency thresholds required before a sensitivity curve is fit.
    pub min_thresholds_for_curve: usize,
}

impl StudyConfig {
    pub fn new(
        frequencies_hz: Vec<f64>,
        slope: f64,
        guess_rate: f64,
        lapse_rate: f64,
        modulation_min_percent: f64,
        modulation_max_percent: f64,
        tcsf_degree: usize,
        min_thresholds_for_curve: usize,
    ) -> Self {
        assert!(!frequencies_hz.is_empty(), "frequency list must be non-empty");
        assert!(
            frequencies_hz.iter().all(|&f| f > 0.0),
            "frequencies must be positive"
        );
        assert!(slope > 0.0, "slope must be positive");
        assert!(
            (0.0..1.0).contains(&guess_rate),
            "guess rate must be in [0, 1)"
        );
        assert!(
            (0.0..1.0).contains(&lapse_rate),
            "lapse rate must be in [0, 1)"
        );
        assert!(
            0.0 < modulation_min_percent && modulation_min_percent < modulation_max_percent,
            "modulation depth range must be positive and ordered"
        );
        assert!(modulation_max_percent <= 100.0, "modulation depth cannot exceed 100%");
        assert!(
            min_thresholds_for_curve > tcsf_degree,
            "a degree-d polynomial needs at least d+1 points"
        );
        Self {
            frequencies_hz,
            slope,
            guess_rate,
            lapse_rate,
            modulation_min_percent,
            modulation_max_percent,
            tcsf_degree,
            min_thresholds_for_curve,
        }
    }

    #[inline]
    pub fn default_slope() -> f64 {
        3.0
    }

    #[inline]
    pub fn default_guess_rate() -> f64 {
        0.5
    }

    #[inline]
    pub fn default_lapse_rate() -> f64 {
        0.02
    }

    #[inline]
    pub fn default_modulation_min_percent() -> f64 {
        0.1
    }

    #[inline]
    pub fn default_modulation_max_percent() -> f64 {
        100.0
    }

    #[inline]
    pub fn default_tcsf_degree() -> usize {
        3
    }

    #[inline]
    pub fn default_min_thresholds_for_curve() -> usize {
        4
    }

    /// Number of tested frequencies.
    pub fn num_frequencies(&self) -> usize {
        self.frequencies_hz.len()
    }

    /// Linear modulation-depth range of the staircase, (min, max) in (0, 1].
    pub fn modulation_bounds_linear(&self) -> (f64, f64) {
        (
            self.modulation_min_percent / 100.0,
            self.modulation_max_percent / 100.0,
        )
    }

    /// Staircase modulation-depth range expressed in amplitude decibels.
    pub fn threshold_bounds_db(&self) -> (f64, f64) {
        let (lo, hi) = self.modulation_bounds_linear();
        (db_from_linear(lo), db_from_linear(hi))
    }

    /// Tested frequency range in log10 space, the search interval for curve peaks.
    pub fn log_frequency_interval(&self) -> (f64, f64) {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &f in &self.frequencies_hz {
            lo = lo.min(f);
            hi = hi.max(f);
        }
        (f64::log10(lo), f64::log10(hi))
    }
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self::new(
            FREQUENCIES_HZ.to_vec(),
            Self::default_slope(),
            Self::default_guess_rate(),
            Self::default_lapse_rate(),
            Self::default_modulation_min_percent(),
            Self::default_modulation_max_percent(),
            Self::default_tcsf_degree(),
            Self::default_min_thresholds_for_curve(),
        )
    }
}
