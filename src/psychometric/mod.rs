//! Psychometric function model and per-cell threshold fitting.

pub mod fitter;
pub mod model;
pub mod posterior;

pub use fitter::{FitBounds, FittedPsychometric, PsychometricFitter};
pub use model::{NPARAMS, PsychometricParams, WeibullPsychometric};
pub use posterior::PosteriorGrid;
