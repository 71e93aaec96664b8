//! Harmonization of literature flicker-sensitivity datasets into the study's
//! log-frequency / log-sensitivity space.

use crate::error::Error;
use crate::tcsf::poly::PolyCurveFit;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Unit convention of a dataset's modulation-depth column.
///
/// Always stated explicitly by the caller; it is never inferred from the magnitude of
/// the values, which would turn a unit mistake into a silent factor-of-100 error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ModulationUnits {
    /// Modulation depth in (0, 1].
    Decimal,
    /// Modulation depth in (0, 100].
    Percent,
}

/// One row of an external dataset.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LiteratureRow {
    pub frequency_hz: f64,
    pub modulation_depth: f64,
}

/// Convert raw rows into `(log10 frequency, log10 sensitivity)` points, where
/// sensitivity is the inverse of the linear modulation depth.
///
/// `units: None` means the dataset did not state its convention, which is an error
/// ([Error::AmbiguousUnits]) rather than a guess.
pub fn harmonize(
    rows: &[LiteratureRow],
    units: Option<ModulationUnits>,
) -> Result<Vec<(f64, f64)>, Error> {
    let units = units.ok_or(Error::AmbiguousUnits)?;
    rows.iter()
        .map(|row| {
            if row.frequency_hz <= 0.0 {
                return Err(Error::NonPositiveFrequency(row.frequency_hz));
            }
            let depth = match units {
                ModulationUnits::Decimal => row.modulation_depth,
                ModulationUnits::Percent => row.modulation_depth / 100.0,
            };
            if !(depth > 0.0 && depth <= 1.0) {
                return Err(Error::NonPositiveModulation(depth));
            }
            Ok((f64::log10(row.frequency_hz), f64::log10(1.0 / depth)))
        })
        .collect()
}

/// Named external dataset with its raw rows and declared unit convention.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LiteratureDataset {
    pub name: String,
    pub rows: Vec<LiteratureRow>,
    pub units: ModulationUnits,
}

/// Harmonized dataset ready for plotting against the study curves.
#[derive(Clone, Debug, PartialEq)]
pub struct HarmonizedDataset {
    pub name: String,
    pub points: Vec<(f64, f64)>,
    /// Absent when the caller requested no curve, or left absent by the caller when
    /// the dataset has too few points for the requested degree.
    pub curve: Option<PolyCurveFit>,
}

impl LiteratureDataset {
    pub fn new(name: impl Into<String>, rows: Vec<LiteratureRow>, units: ModulationUnits) -> Self {
        Self {
            name: name.into(),
            rows,
            units,
        }
    }

    pub fn harmonized_points(&self) -> Result<Vec<(f64, f64)>, Error> {
        harmonize(&self.rows, Some(self.units))
    }

    /// Harmonize and, when `degree` is given, fit a comparison curve of that degree
    /// (2 for the one dataset published with a quadratic fit, 3 elsewhere).
    pub fn harmonize_with_curve(&self, degree: Option<usize>) -> Result<HarmonizedDataset, Error> {
        let points = self.harmonized_points()?;
        let curve = match degree {
            Some(degree) => Some(PolyCurveFit::fit_points(&points, degree)?),
            None => None,
        };
        Ok(HarmonizedDataset {
            name: self.name.clone(),
            points,
            curve,
        })
    }
}
