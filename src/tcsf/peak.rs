use crate::tcsf::poly::PolyCurveFit;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Peak of a fitted sensitivity curve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PeakEstimate {
    /// Frequency of maximum sensitivity, Hz (linear units).
    pub frequency_hz: f64,
    /// Sensitivity at the peak, log10 units.
    pub log_sensitivity: f64,
}

/// Locate the maximum of a fitted curve over a log10-frequency interval.
///
/// Golden-section search: derivative-free, deterministic for fixed bounds, and never
/// evaluates outside the interval, so the peak cannot be extrapolated beyond the
/// tested frequency range. Like any local bounded search it returns a local maximum
/// if the curve is not unimodal on the interval; the degree-3 curves fit over the
/// tested range are in practice unimodal.
pub fn extract_peak(curve: &PolyCurveFit, interval_log10: (f64, f64)) -> PeakEstimate {
    let (mut a, mut b) = interval_log10;
    assert!(
        a.is_finite() && b.is_finite() && a <= b,
        "search interval must be finite and ordered"
    );

    const INVPHI: f64 = 0.618_033_988_749_894_9;
    const X_TOL: f64 = 1e-10;

    let mut c = b - INVPHI * (b - a);
    let mut d = a + INVPHI * (b - a);
    let mut fc = curve.value(c);
    let mut fd = curve.value(d);
    while b - a > X_TOL {
        if fc > fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INVPHI * (b - a);
            fc = curve.value(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INVPHI * (b - a);
            fd = curve.value(d);
        }
    }

    // The interior search converges to the endpoints for monotone curves, but
    // evaluate them explicitly so an endpoint maximum is exact.
    let (lo, hi) = interval_log10;
    let x_mid = 0.5 * (a + b);
    let mut best = (x_mid, curve.value(x_mid));
    for x in [lo, hi] {
        let y = curve.value(x);
        if y > best.1 {
            best = (x, y);
        }
    }

    PeakEstimate {
        frequency_hz: f64::powf(10.0, best.0),
        log_sensitivity: best.1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FREQUENCIES_HZ, StudyConfig};

    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn fit_over_frequencies(f: impl Fn(f64) -> f64, degree: usize) -> PolyCurveFit {
        let points: Vec<(f64, f64)> = FREQUENCIES_HZ
            .iter()
            .map(|&hz| {
                let x = f64::log10(hz);
                (x, f(x))
            })
            .collect();
        PolyCurveFit::fit_points(&points, degree).unwrap()
    }

    #[test]
    fn interior_maximum_found() {
        // Parabola peaked at log10(f) = 2.5, i.e. ~316 Hz.
        let curve = fit_over_frequencies(|x| 1.5 - (x - 2.5).powi(2), 2);
        let peak = extract_peak(&curve, StudyConfig::default().log_frequency_interval());
        assert_relative_eq!(peak.frequency_hz, f64::powf(10.0, 2.5), max_relative = 1e-6);
        assert_abs_diff_eq!(peak.log_sensitivity, 1.5, epsilon = 1e-9);
    }

    #[test]
    fn decreasing_line_peaks_at_lowest_frequency() {
        let curve = fit_over_frequencies(|x| 2.0 - 0.1 * x, 3);
        let peak = extract_peak(&curve, StudyConfig::default().log_frequency_interval());
        assert_relative_eq!(peak.frequency_hz, 80.0, max_relative = 1e-9);
        assert_abs_diff_eq!(
            peak.log_sensitivity,
            2.0 - 0.1 * f64::log10(80.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn increasing_line_peaks_at_highest_frequency() {
        let curve = fit_over_frequencies(|x| 0.5 + 0.2 * x, 3);
        let peak = extract_peak(&curve, StudyConfig::default().log_frequency_interval());
        assert_relative_eq!(peak.frequency_hz, 1800.0, max_relative = 1e-9);
    }

    #[test]
    fn peak_stays_in_tested_range() {
        let config = StudyConfig::default();
        let (lo, hi) = config.log_frequency_interval();
        for coeff in [-0.4, -0.1, 0.0, 0.1, 0.4] {
            let curve = fit_over_frequencies(|x| 1.0 + coeff * (x - 2.4).powi(3) - 0.2 * x, 3);
            let peak = extract_peak(&curve, (lo, hi));
            let x = f64::log10(peak.frequency_hz);
            assert!(x >= lo - 1e-9 && x <= hi + 1e-9);
        }
    }
}
