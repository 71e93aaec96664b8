//! Temporal contrast sensitivity curve fitting and peak extraction.

pub mod peak;
pub mod poly;

pub use peak::{PeakEstimate, extract_peak};
pub use poly::PolyCurveFit;
