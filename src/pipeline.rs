//! Batch orchestration: per-participant threshold fitting across all tested
//! frequencies, the participant × frequency threshold matrix, per-participant and
//! population sensitivity curves, and end-of-batch failure reporting.

use crate::config::StudyConfig;
use crate::error::Error;
use crate::psychometric::{FitBounds, FittedPsychometric, PosteriorGrid, PsychometricFitter};
use crate::tcsf::{PeakEstimate, PolyCurveFit, extract_peak};
use crate::trial::{OutcomeCounts, TrialSequence};

use log::warn;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Staircase record for one (participant, frequency) cell: the trial sequence plus
/// the posterior the staircase accumulated while collecting it.
#[derive(Clone, Debug)]
pub struct FrequencyBlock {
    pub trials: TrialSequence,
    pub posterior: PosteriorGrid,
}

/// Raw input for one participant; `blocks` is keyed positionally by the study's
/// frequency list, `None` marking a missing trial file or frequency block.
#[derive(Clone, Debug)]
pub struct ParticipantData {
    pub id: String,
    pub blocks: Vec<Option<FrequencyBlock>>,
}

/// Everything derived for one participant, built whole and then inserted; never
/// mutated field by field across iterations.
#[derive(Clone, Debug)]
pub struct ParticipantResult {
    pub id: String,
    /// Fitted psychometric function per frequency cell, in frequency-list order.
    pub fits: Vec<Option<FittedPsychometric>>,
    /// Visibility thresholds (linear modulation depth), same ordering.
    pub thresholds: Vec<Option<f64>>,
    pub curve: Option<PolyCurveFit>,
    pub peak: Option<PeakEstimate>,
}

/// Participant × frequency matrix of visibility thresholds.
///
/// Cells are `Option<f64>` in frequency-list order; absent cells stay `None`, never a
/// numeric placeholder.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdMatrix {
    participant_ids: Vec<String>,
    rows: Vec<Vec<Option<f64>>>,
}

impl ThresholdMatrix {
    pub fn from_results(results: &[ParticipantResult]) -> Self {
        Self {
            participant_ids: results.iter().map(|r| r.id.clone()).collect(),
            rows: results.iter().map(|r| r.thresholds.clone()).collect(),
        }
    }

    pub fn num_participants(&self) -> usize {
        self.rows.len()
    }

    pub fn num_frequencies(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn participant_ids(&self) -> &[String] {
        &self.participant_ids
    }

    pub fn row(&self, participant: usize) -> &[Option<f64>] {
        &self.rows[participant]
    }

    pub fn cell(&self, participant: usize, frequency: usize) -> Option<f64> {
        self.rows[participant][frequency]
    }

    /// Mean threshold over the participants with a value at this frequency.
    pub fn column_mean(&self, frequency: usize) -> Option<f64> {
        let values: Vec<f64> = self
            .rows
            .iter()
            .filter_map(|row| row[frequency])
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }
}

/// One recorded failure: which participant, which frequency cell (if any), and what
/// went wrong. `frequency_index: None` marks a participant-level failure such as too
/// few thresholds for the sensitivity curve.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchFailure {
    pub participant: String,
    pub frequency_index: Option<usize>,
    pub error: Error,
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.frequency_index {
            Some(idx) => write!(
                f,
                "participant {} frequency index {idx}: {}",
                self.participant, self.error
            ),
            None => write!(f, "participant {}: {}", self.participant, self.error),
        }
    }
}

/// All failures collected over one batch run. Failures never abort the batch; they
/// are reported here at the end.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchReport {
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Population mean curve over the per-frequency mean thresholds.
#[derive(Clone, Debug)]
pub struct PopulationCurve {
    /// Mean visibility threshold per frequency, frequency-list order.
    pub mean_thresholds: Vec<Option<f64>>,
    pub curve: PolyCurveFit,
    pub peak: PeakEstimate,
}

/// Full output of a batch run.
#[derive(Clone, Debug)]
pub struct BatchOutput {
    pub results: Vec<ParticipantResult>,
    pub matrix: ThresholdMatrix,
    pub population: Option<PopulationCurve>,
    pub report: BatchReport,
}

/// `(log10 frequency, log10 sensitivity)` points for the cells that have a
/// threshold.
fn sensitivity_points(thresholds: &[Option<f64>], config: &StudyConfig) -> Vec<(f64, f64)> {
    thresholds
        .iter()
        .zip(&config.frequencies_hz)
        .filter_map(|(threshold, &freq)| {
            threshold.map(|t| (f64::log10(freq), f64::log10(1.0 / t)))
        })
        .collect()
}

fn fit_curve_and_peak(
    thresholds: &[Option<f64>],
    config: &StudyConfig,
) -> Result<(PolyCurveFit, PeakEstimate), Error> {
    let points = sensitivity_points(thresholds, config);
    if points.len() < config.min_thresholds_for_curve {
        return Err(Error::InsufficientData {
            actual: points.len(),
            minimum: config.min_thresholds_for_curve,
        });
    }
    let curve = PolyCurveFit::fit_points(&points, config.tcsf_degree)?;
    let peak = extract_peak(&curve, config.log_frequency_interval());
    Ok((curve, peak))
}

/// Fit every frequency cell of one participant, then the sensitivity curve over the
/// cells that produced a threshold.
///
/// Missing blocks and failed fits are warned about, recorded, and skipped; the
/// participant record is still produced with `None` in the affected cells.
pub fn fit_participant(
    data: &ParticipantData,
    fitter: &PsychometricFitter,
    config: &StudyConfig,
) -> (ParticipantResult, Vec<BatchFailure>) {
    assert_eq!(
        data.blocks.len(),
        config.num_frequencies(),
        "participant blocks must be keyed by the study frequency list"
    );

    let bounds = FitBounds::from_config(config);
    let mut fits: Vec<Option<FittedPsychometric>> = vec![None; config.num_frequencies()];
    let mut thresholds: Vec<Option<f64>> = vec![None; config.num_frequencies()];
    let mut failures = Vec::new();

    for (idx, block) in data.blocks.iter().enumerate() {
        let Some(block) = block else {
            warn!(
                "participant {} has no trial block at frequency index {idx}; skipping cell",
                data.id
            );
            failures.push(BatchFailure {
                participant: data.id.clone(),
                frequency_index: Some(idx),
                error: Error::MissingInput {
                    participant: data.id.clone(),
                    frequency_index: idx,
                },
            });
            continue;
        };
        let counts = OutcomeCounts::from_trials(block.trials.trials());
        match fitter.fit(&counts, &block.posterior, &bounds) {
            Ok(fitted) => {
                thresholds[idx] = Some(fitted.visibility_threshold());
                fits[idx] = Some(fitted);
            }
            Err(error) => {
                warn!(
                    "psychometric fit failed for participant {} at frequency index {idx}: {error}",
                    data.id
                );
                failures.push(BatchFailure {
                    participant: data.id.clone(),
                    frequency_index: Some(idx),
                    error,
                });
            }
        }
    }

    let (curve, peak) = match fit_curve_and_peak(&thresholds, config) {
        Ok((curve, peak)) => (Some(curve), Some(peak)),
        Err(error) => {
            warn!(
                "sensitivity curve unavailable for participant {}: {error}",
                data.id
            );
            failures.push(BatchFailure {
                participant: data.id.clone(),
                frequency_index: None,
                error,
            });
            (None, None)
        }
    };

    (
        ParticipantResult {
            id: data.id.clone(),
            fits,
            thresholds,
            curve,
            peak,
        },
        failures,
    )
}

/// Run the whole batch: participants in parallel, failures collected, population
/// mean curve at the end.
pub fn run_batch(
    participants: &[ParticipantData],
    fitter: &PsychometricFitter,
    config: &StudyConfig,
) -> BatchOutput {
    let per_participant: Vec<_> = participants
        .par_iter()
        .map(|data| fit_participant(data, fitter, config))
        .collect();

    let mut results = Vec::with_capacity(per_participant.len());
    let mut report = BatchReport::default();
    for (result, failures) in per_participant {
        results.push(result);
        report.failures.extend(failures);
    }

    let matrix = ThresholdMatrix::from_results(&results);

    let mean_thresholds: Vec<Option<f64>> = (0..config.num_frequencies())
        .map(|idx| matrix.column_mean(idx))
        .collect();
    let population = match fit_curve_and_peak(&mean_thresholds, config) {
        Ok((curve, peak)) => Some(PopulationCurve {
            mean_thresholds,
            curve,
            peak,
        }),
        Err(error) => {
            warn!("population sensitivity curve unavailable: {error}");
            report.failures.push(BatchFailure {
                participant: "population".into(),
                frequency_index: None,
                error,
            });
            None
        }
    };

    BatchOutput {
        results,
        matrix,
        population,
        report,
    }
}
