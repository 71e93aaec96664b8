use crate::error::Error;
use crate::types::ArrayRef1;

use macro_const::macro_const;
use ndarray::{Array1, Array2};
use ordered_float::NotNan;
use serde::{Deserialize, Serialize};

/// Two-sided 97.5% Student-t quantiles for 1..=30 residual degrees of freedom;
/// the normal quantile is used beyond the table.
const T_QUANTILE_975: [f64; 30] = [
    12.706, 4.303, 3.182, 2.776, 2.571, 2.447, 2.365, 2.306, 2.262, 2.228, 2.201, 2.179, 2.160,
    2.145, 2.131, 2.120, 2.110, 2.101, 2.093, 2.086, 2.080, 2.074, 2.069, 2.064, 2.060, 2.056,
    2.052, 2.048, 2.045, 2.042,
];

fn t_quantile_975(dof: usize) -> f64 {
    match dof {
        0 => 0.0,
        d if d <= T_QUANTILE_975.len() => T_QUANTILE_975[d - 1],
        _ => 1.960,
    }
}

/// Gauss-Jordan inversion with partial pivoting; `None` for singular input.
///
/// The normal matrices here are (degree+1)² with degree ≤ 3, so a dense textbook
/// inversion is adequate.
fn invert(mut a: Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut inv = Array2::eye(n);
    for col in 0..n {
        let mut pivot_row = col;
        for row in col + 1..n {
            if a[[row, col]].abs() > a[[pivot_row, col]].abs() {
                pivot_row = row;
            }
        }
        if a[[pivot_row, col]].abs() < 1e-12 {
            return None;
        }
        if pivot_row != col {
            for j in 0..n {
                a.swap([pivot_row, j], [col, j]);
                inv.swap([pivot_row, j], [col, j]);
            }
        }
        let pivot = a[[col, col]];
        for j in 0..n {
            a[[col, j]] /= pivot;
            inv[[col, j]] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[[row, j]] -= factor * a[[col, j]];
                inv[[row, j]] -= factor * inv[[col, j]];
            }
        }
    }
    Some(inv)
}

macro_const! {
    const DOC: &str = r"
Least-squares polynomial fit of log sensitivity over log frequency

Ordinary least squares of $y = \sum_k c_k x^k$ where $x$ is log10 frequency and $y$
log10 sensitivity. The degree is caller-supplied (3 for the present study, 2 for one
literature dataset). Requires at least degree+1 distinct abscissa values. Reports
$R^2$ and a pointwise 95% confidence band for the mean response.
";
}

#[doc = DOC!()]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolyCurveFit {
    coefficients: Vec<f64>,
    r_squared: f64,
    residual_variance: f64,
    dof: usize,
    xtx_inv: Array2<f64>,
}

impl PolyCurveFit {
    pub const fn doc() -> &'static str {
        DOC
    }

    /// Fit a degree-`degree` polynomial to `(x, y)` samples.
    ///
    /// Fails with [Error::InsufficientData] when fewer than degree+1 distinct x
    /// values are present; never silently degrades to a lower degree.
    pub fn fit(x: &[f64], y: &[f64], degree: usize) -> Result<Self, Error> {
        assert_eq!(x.len(), y.len(), "x and y must have the same length");
        assert!(
            x.iter().chain(y.iter()).all(|v| v.is_finite()),
            "samples must be finite"
        );

        let nparams = degree + 1;
        let distinct = {
            let mut sorted: Vec<NotNan<f64>> =
                x.iter().map(|&v| NotNan::new(v).unwrap()).collect();
            sorted.sort_unstable();
            sorted.dedup();
            sorted.len()
        };
        if distinct < nparams {
            return Err(Error::InsufficientData {
                actual: distinct,
                minimum: nparams,
            });
        }

        let n = x.len();
        let mut xtx = Array2::zeros((nparams, nparams));
        let mut xty = Array1::<f64>::zeros(nparams);
        for (&xi, &yi) in x.iter().zip(y.iter()) {
            let mut power = 1.0;
            let mut powers = Vec::with_capacity(2 * nparams - 1);
            for _ in 0..2 * nparams - 1 {
                powers.push(power);
                power *= xi;
            }
            for i in 0..nparams {
                xty[i] += yi * powers[i];
                for j in 0..nparams {
                    xtx[[i, j]] += powers[i + j];
                }
            }
        }

        let xtx_inv = invert(xtx).ok_or(Error::FitFailed("singular normal equations"))?;
        let coefficients: Vec<f64> = (0..nparams)
            .map(|i| (0..nparams).map(|j| xtx_inv[[i, j]] * xty[j]).sum())
            .collect();

        let evaluate = |xi: f64| {
            coefficients
                .iter()
                .rev()
                .fold(0.0, |acc, &c| acc * xi + c)
        };
        let ss_res: f64 = x
            .iter()
            .zip(y.iter())
            .map(|(&xi, &yi)| (yi - evaluate(xi)).powi(2))
            .sum();
        let mean_y: f64 = y.iter().sum::<f64>() / n as f64;
        let ss_tot: f64 = y.iter().map(|&yi| (yi - mean_y).powi(2)).sum();
        let r_squared = if ss_tot > f64::EPSILON * n as f64 {
            1.0 - ss_res / ss_tot
        } else if ss_res <= f64::EPSILON * n as f64 {
            1.0
        } else {
            0.0
        };

        let dof = n - nparams;
        let residual_variance = if dof > 0 { ss_res / dof as f64 } else { 0.0 };

        Ok(Self {
            coefficients,
            r_squared,
            residual_variance,
            dof,
            xtx_inv,
        })
    }

    /// Fit from `(x, y)` pairs; see [Self::fit].
    pub fn fit_points(points: &[(f64, f64)], degree: usize) -> Result<Self, Error> {
        let (x, y): (Vec<f64>, Vec<f64>) = points.iter().copied().unzip();
        Self::fit(&x, &y, degree)
    }

    /// Coefficients in ascending power order.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    pub fn r_squared(&self) -> f64 {
        self.r_squared
    }

    /// Evaluate the fitted polynomial; valid outside the fitted range, which plotting
    /// uses to extend curves to display bounds.
    pub fn value(&self, x: f64) -> f64 {
        self.coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
    }

    /// Vectorized [Self::value].
    pub fn values(&self, xs: &ArrayRef1<f64>) -> Array1<f64> {
        xs.iter().map(|&x| self.value(x)).collect()
    }

    /// Pointwise 95% confidence band for the mean response at `xs`.
    ///
    /// Returns `(lower, upper)` arrays. With zero residual degrees of freedom (exact
    /// interpolation) the band collapses onto the curve.
    pub fn confidence_band(&self, xs: &ArrayRef1<f64>) -> (Array1<f64>, Array1<f64>) {
        let nparams = self.coefficients.len();
        let t = t_quantile_975(self.dof);
        let mut lower = Array1::zeros(xs.len());
        let mut upper = Array1::zeros(xs.len());
        for (idx, &x) in xs.iter().enumerate() {
            let mut basis = Vec::with_capacity(nparams);
            let mut power = 1.0;
            for _ in 0..nparams {
                basis.push(power);
                power *= x;
            }
            let mut leverage = 0.0;
            for i in 0..nparams {
                for j in 0..nparams {
                    leverage += basis[i] * self.xtx_inv[[i, j]] * basis[j];
                }
            }
            let half_width = t * f64::sqrt(self.residual_variance * leverage.max(0.0));
            let y = self.value(x);
            lower[idx] = y - half_width;
            upper[idx] = y + half_width;
        }
        (lower, upper)
    }
}
