use crate::psychometric::model::PsychometricParams;

use ndarray::Array1;

/// Discrete posterior over candidate parameter vectors, accumulated by the adaptive
/// staircase during data collection.
///
/// The staircase engine itself is out of scope; its output arrives as a frozen pair of
/// parallel arrays and is opaque to the fitter except for the MAP (arg-max) lookup
/// that seeds refinement.
#[derive(Clone, Debug, PartialEq)]
pub struct PosteriorGrid {
    weights: Array1<f64>,
    domain: Vec<PsychometricParams>,
}

impl PosteriorGrid {
    /// Pair posterior weights with their parameter grid.
    ///
    /// Both arrays must be non-empty and of equal length; weights must be finite.
    pub fn new(weights: Array1<f64>, domain: Vec<PsychometricParams>) -> Self {
        assert!(!domain.is_empty(), "posterior grid must be non-empty");
        assert_eq!(
            weights.len(),
            domain.len(),
            "posterior weights and parameter grid must have the same length"
        );
        assert!(
            weights.iter().all(|w| w.is_finite()),
            "posterior weights must be finite"
        );
        Self { weights, domain }
    }

    pub fn len(&self) -> usize {
        self.domain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domain.is_empty()
    }

    /// Maximum-a-posteriori parameter vector.
    ///
    /// Ties keep the first occurrence in domain order.
    pub fn map_estimate(&self) -> PsychometricParams {
        let (idx, _) = self
            .weights
            .iter()
            .enumerate()
            .fold((0, self.weights[0]), |(max_idx, max_w), (idx, &w)| {
                if w > max_w { (idx, w) } else { (max_idx, max_w) }
            });
        self.domain[idx]
    }
}
