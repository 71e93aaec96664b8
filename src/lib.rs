#![doc = include_str!("../README.md")]

mod config;
pub use config::{FREQUENCIES_HZ, StudyConfig, db_from_linear, linear_from_db};

mod error;
pub use error::Error;

pub mod literature;
pub use literature::{HarmonizedDataset, LiteratureDataset, LiteratureRow, ModulationUnits};

pub mod pipeline;
pub use pipeline::{BatchOutput, BatchReport, ThresholdMatrix, run_batch};

pub mod psychometric;
pub use psychometric::{
    FitBounds, FittedPsychometric, PosteriorGrid, PsychometricFitter, PsychometricParams,
    WeibullPsychometric,
};

pub mod replay;
pub use replay::{ReplaySnapshot, TrialReplay};

pub mod tcsf;
pub use tcsf::{PeakEstimate, PolyCurveFit, extract_peak};

mod trial;
pub use trial::{OutcomeCounts, Trial, TrialSequence};

mod types;

pub use ndarray;
