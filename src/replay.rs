//! Trial-by-trial replay of the fitting chain for the animation consumer.
//!
//! The replay is a fold over the presentation-ordered trial stream: each step
//! consumes the next trial of one frequency, refits that frequency's psychometric
//! function on the prefix seen so far, and refits the sensitivity curve once enough
//! frequencies have a threshold. Only the current state is ever required; earlier
//! snapshots are never regenerated.

use crate::config::StudyConfig;
use crate::pipeline::ParticipantData;
use crate::psychometric::{FitBounds, FittedPsychometric, PsychometricFitter};
use crate::tcsf::{PeakEstimate, PolyCurveFit, extract_peak};
use crate::trial::OutcomeCounts;

/// State of the incremental chain after one trial has been consumed.
#[derive(Clone, Debug)]
pub struct ReplaySnapshot {
    /// Zero-based index of the trial just consumed, over the whole stream.
    pub trial_index: usize,
    /// Frequency cell the trial belonged to.
    pub frequency_index: usize,
    /// Per-frequency outcome counts over the prefixes seen so far.
    pub counts: Vec<OutcomeCounts>,
    /// Latest successful fit per frequency; a failed refit keeps the previous one.
    pub fits: Vec<Option<FittedPsychometric>>,
    /// Sensitivity curve over the current thresholds, present once at least
    /// `min_thresholds_for_curve` frequencies have one.
    pub curve: Option<PolyCurveFit>,
    /// Peak of `curve`, when present.
    pub peak: Option<PeakEstimate>,
}

/// Finite lazy iterator of [ReplaySnapshot]s for one participant.
///
/// `order` gives the frequency index of each presentation step; steps pointing at a
/// missing block or an exhausted sequence are skipped. Restart by constructing a new
/// iterator.
pub struct TrialReplay<'a> {
    data: &'a ParticipantData,
    fitter: &'a PsychometricFitter,
    config: &'a StudyConfig,
    bounds: FitBounds,
    order: std::vec::IntoIter<usize>,
    consumed: Vec<usize>,
    counts: Vec<OutcomeCounts>,
    fits: Vec<Option<FittedPsychometric>>,
    curve: Option<PolyCurveFit>,
    trial_index: usize,
}

impl<'a> TrialReplay<'a> {
    pub fn new(
        data: &'a ParticipantData,
        fitter: &'a PsychometricFitter,
        config: &'a StudyConfig,
        order: Vec<usize>,
    ) -> Self {
        assert_eq!(
            data.blocks.len(),
            config.num_frequencies(),
            "participant blocks must be keyed by the study frequency list"
        );
        assert!(
            order.iter().all(|&idx| idx < data.blocks.len()),
            "presentation order indexes out of range"
        );
        let num = data.blocks.len();
        Self {
            data,
            fitter,
            config,
            bounds: FitBounds::from_config(config),
            order: order.into_iter(),
            consumed: vec![0; num],
            counts: vec![OutcomeCounts::default(); num],
            fits: vec![None; num],
            curve: None,
            trial_index: 0,
        }
    }

    /// Replay each frequency's trials to exhaustion in frequency-list order.
    pub fn sequential(
        data: &'a ParticipantData,
        fitter: &'a PsychometricFitter,
        config: &'a StudyConfig,
    ) -> Self {
        let order = data
            .blocks
            .iter()
            .enumerate()
            .flat_map(|(idx, block)| {
                let len = block.as_ref().map_or(0, |b| b.trials.len());
                std::iter::repeat_n(idx, len)
            })
            .collect();
        Self::new(data, fitter, config, order)
    }

    fn refit_curve(&mut self) {
        let points: Vec<(f64, f64)> = self
            .fits
            .iter()
            .zip(&self.config.frequencies_hz)
            .filter_map(|(fit, &freq)| {
                fit.as_ref().map(|f| {
                    (
                        f64::log10(freq),
                        f64::log10(1.0 / f.visibility_threshold()),
                    )
                })
            })
            .collect();
        if points.len() < self.config.min_thresholds_for_curve {
            self.curve = None;
            return;
        }
        // A transiently degenerate point set keeps the previous curve absent rather
        // than aborting the replay.
        self.curve = PolyCurveFit::fit_points(&points, self.config.tcsf_degree).ok();
    }
}

impl Iterator for TrialReplay<'_> {
    type Item = ReplaySnapshot;

    fn next(&mut self) -> Option<ReplaySnapshot> {
        loop {
            let idx = self.order.next()?;
            let Some(block) = self.data.blocks[idx].as_ref() else {
                continue;
            };
            if self.consumed[idx] >= block.trials.len() {
                continue;
            }
            self.consumed[idx] += 1;

            let prefix = block.trials.prefix(self.consumed[idx]);
            self.counts[idx] = OutcomeCounts::from_trials(prefix);
            if let Ok(fitted) = self
                .fitter
                .fit(&self.counts[idx], &block.posterior, &self.bounds)
            {
                self.fits[idx] = Some(fitted);
            }
            self.refit_curve();

            let snapshot = ReplaySnapshot {
                trial_index: self.trial_index,
                frequency_index: idx,
                counts: self.counts.clone(),
                fits: self.fits.clone(),
                curve: self.curve.clone(),
                peak: self
                    .curve
                    .as_ref()
                    .map(|curve| extract_peak(curve, self.config.log_frequency_interval())),
            };
            self.trial_index += 1;
            return Some(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FrequencyBlock;
    use crate::psychometric::{PosteriorGrid, PsychometricParams, WeibullPsychometric};
    use crate::trial::{Trial, TrialSequence};

    use ndarray::Array1;

    fn study_params(config: &StudyConfig, threshold_db: f64) -> PsychometricParams {
        PsychometricParams::new(threshold_db, config.slope, config.guess_rate, config.lapse_rate)
    }

    fn synthetic_block(config: &StudyConfig, threshold_db: f64, n_per_level: u32) -> FrequencyBlock {
        let truth = study_params(config, threshold_db);
        let mut trials = Vec::new();
        for offset in [-12.0, -6.0, 0.0, 6.0, 12.0] {
            let level = threshold_db + offset;
            let p = WeibullPsychometric::probability(level, &truth);
            let k = (p * f64::from(n_per_level)).round() as u32;
            for i in 0..n_per_level {
                trials.push(Trial {
                    level_db: level,
                    detected: i < k,
                });
            }
        }
        let domain: Vec<_> = (0..61)
            .map(|i| study_params(config, -60.0 + i as f64))
            .collect();
        let weights: Array1<f64> = domain
            .iter()
            .map(|p| f64::exp(-0.5 * (p.threshold_db - threshold_db).powi(2) / 16.0))
            .collect();
        FrequencyBlock {
            trials: TrialSequence::new(trials),
            posterior: PosteriorGrid::new(weights, domain),
        }
    }

    fn replay_participant(config: &StudyConfig, n_per_level: u32) -> ParticipantData {
        let blocks = config
            .frequencies_hz
            .iter()
            .map(|&freq| {
                let x = f64::log10(freq);
                Some(synthetic_block(config, -28.0 + 6.0 * (x - 2.6).powi(2), n_per_level))
            })
            .collect();
        ParticipantData {
            id: "replay".into(),
            blocks,
        }
    }

    #[test]
    fn snapshot_count_equals_trial_count() {
        let config = StudyConfig::default();
        let fitter = PsychometricFitter::default();
        let data = replay_participant(&config, 4);
        let total: usize = data
            .blocks
            .iter()
            .map(|b| b.as_ref().unwrap().trials.len())
            .sum();
        let snapshots: Vec<_> = TrialReplay::sequential(&data, &fitter, &config).collect();
        assert_eq!(snapshots.len(), total);
        assert_eq!(snapshots.last().unwrap().trial_index, total - 1);
    }

    #[test]
    fn counts_grow_only_for_consumed_frequency() {
        let config = StudyConfig::default();
        let fitter = PsychometricFitter::default();
        let data = replay_participant(&config, 3);
        let mut replay = TrialReplay::sequential(&data, &fitter, &config);
        let first = replay.next().unwrap();
        assert_eq!(first.frequency_index, 0);
        assert_eq!(first.counts[0].total_trials(), 1);
        for idx in 1..config.num_frequencies() {
            assert_eq!(first.counts[idx].total_trials(), 0);
        }
    }

    #[test]
    fn curve_appears_after_enough_frequencies() {
        let config = StudyConfig::default();
        let fitter = PsychometricFitter::default();
        let data = replay_participant(&config, 6);
        let mut frequencies_with_fit_at_first_curve = None;
        for snapshot in TrialReplay::sequential(&data, &fitter, &config) {
            if snapshot.curve.is_some() {
                frequencies_with_fit_at_first_curve =
                    Some(snapshot.fits.iter().filter(|f| f.is_some()).count());
                break;
            }
        }
        let count = frequencies_with_fit_at_first_curve
            .expect("curve should appear before the stream ends");
        assert!(count >= config.min_thresholds_for_curve);
    }

    #[test]
    fn final_snapshot_matches_batch_fit() {
        let config = StudyConfig::default();
        let fitter = PsychometricFitter::default();
        let data = replay_participant(&config, 8);
        let last = TrialReplay::sequential(&data, &fitter, &config)
            .last()
            .unwrap();
        let (batch, _) = crate::pipeline::fit_participant(&data, &fitter, &config);
        for (replay_fit, batch_fit) in last.fits.iter().zip(&batch.fits) {
            let replay_fit = replay_fit.as_ref().unwrap();
            let batch_fit = batch_fit.as_ref().unwrap();
            approx::assert_abs_diff_eq!(
                replay_fit.params().threshold_db,
                batch_fit.params().threshold_db,
                epsilon = 1e-6
            );
        }
        assert!(last.curve.is_some());
        let peak = last.peak.unwrap();
        assert!(peak.frequency_hz >= 80.0 && peak.frequency_hz <= 1800.0);
    }

    #[test]
    fn missing_blocks_are_skipped() {
        let config = StudyConfig::default();
        let fitter = PsychometricFitter::default();
        let mut data = replay_participant(&config, 3);
        data.blocks[2] = None;
        let snapshots: Vec<_> = TrialReplay::sequential(&data, &fitter, &config).collect();
        assert!(snapshots.iter().all(|s| s.frequency_index != 2));
        assert!(snapshots.last().unwrap().counts[2].is_empty());
    }
}
