use crate::types::ArrayRef1;

use macro_const::macro_const;
use ndarray::Array1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Number of psychometric parameters: threshold, slope, guess rate, lapse rate.
pub const NPARAMS: usize = 4;

macro_const! {
    const DOC: &str = r"
Log-domain Weibull psychometric function

Maps a stimulus level $x$ in amplitude decibels to a detection probability:

$$
p(x) = \gamma + (1 - \gamma - \lambda) \left(1 - \exp\left(-10^{\beta (x - \alpha) / 20}\right)\right),
$$

where $\alpha$ is the threshold in the same decibel units as $x$, $\beta$ the slope,
$\gamma$ the guess rate, and $\lambda$ the lapse rate. Monotonically non-decreasing
in $x$ for $\beta > 0$, and well-defined outside the fitted stimulus range, so the
same function draws smooth extrapolated curves for plotting.
";
}

/// Parameters of the psychometric function, in fixed order
/// (threshold, slope, guess rate, lapse rate).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PsychometricParams {
    /// Threshold in amplitude decibels of modulation depth.
    pub threshold_db: f64,
    /// Weibull slope.
    pub slope: f64,
    /// Guess rate.
    pub guess_rate: f64,
    /// Lapse rate.
    pub lapse_rate: f64,
}

impl PsychometricParams {
    pub fn new(threshold_db: f64, slope: f64, guess_rate: f64, lapse_rate: f64) -> Self {
        Self {
            threshold_db,
            slope,
            guess_rate,
            lapse_rate,
        }
    }

    #[inline]
    pub fn to_array(self) -> [f64; NPARAMS] {
        [self.threshold_db, self.slope, self.guess_rate, self.lapse_rate]
    }

    #[inline]
    pub fn from_array(x: [f64; NPARAMS]) -> Self {
        Self {
            threshold_db: x[0],
            slope: x[1],
            guess_rate: x[2],
            lapse_rate: x[3],
        }
    }
}

#[doc = DOC!()]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WeibullPsychometric;

impl WeibullPsychometric {
    pub const fn doc() -> &'static str {
        DOC
    }

    /// Detection probability at one stimulus level.
    #[inline]
    pub fn probability(level_db: f64, params: &PsychometricParams) -> f64 {
        let k = f64::powf(10.0, params.slope * (level_db - params.threshold_db) / 20.0);
        params.guess_rate + (1.0 - params.guess_rate - params.lapse_rate) * (1.0 - f64::exp(-k))
    }

    /// Vectorized [Self::probability] for plotting curves and confidence bands.
    pub fn probabilities(levels_db: &ArrayRef1<f64>, params: &PsychometricParams) -> Array1<f64> {
        levels_db
            .iter()
            .map(|&x| Self::probability(x, params))
            .collect()
    }
}
