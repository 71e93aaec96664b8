use std::collections::BTreeMap;

use ordered_float::NotNan;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One staircase observation: a stimulus level in amplitude decibels and whether the
/// participant reported the phantom array at that level.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Trial {
    pub level_db: f64,
    pub detected: bool,
}

/// Ordered staircase record for one participant at one flicker frequency.
///
/// The order is the presentation order; batch fitting ignores it, incremental replay
/// does not. Immutable after construction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrialSequence(Vec<Trial>);

impl TrialSequence {
    /// Wrap a presentation-ordered trial list.
    ///
    /// All stimulus levels must be finite.
    pub fn new(trials: Vec<Trial>) -> Self {
        assert!(
            trials.iter().all(|trial| trial.level_db.is_finite()),
            "stimulus levels must be finite"
        );
        Self(trials)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn trials(&self) -> &[Trial] {
        &self.0
    }

    /// First `n` trials in presentation order, clipped to the sequence length.
    pub fn prefix(&self, n: usize) -> &[Trial] {
        &self.0[..n.min(self.0.len())]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Trial> {
        self.0.iter()
    }
}

impl From<Vec<Trial>> for TrialSequence {
    fn from(trials: Vec<Trial>) -> Self {
        Self::new(trials)
    }
}

/// Outcome counts per distinct stimulus level, ascending by level.
///
/// Levels come from the staircase's fixed grid, so grouping uses exact equality.
/// Levels with no trials are never reported.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    levels_db: Vec<f64>,
    trials: Vec<u32>,
    successes: Vec<u32>,
}

impl OutcomeCounts {
    /// Collapse a trial slice (a full sequence or an ordered prefix of one) into
    /// per-level counts.
    pub fn from_trials(trials: &[Trial]) -> Self {
        let mut groups: BTreeMap<NotNan<f64>, (u32, u32)> = BTreeMap::new();
        for trial in trials {
            // Finiteness is enforced by the TrialSequence constructor
            let level = NotNan::new(trial.level_db).unwrap();
            let entry = groups.entry(level).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += u32::from(trial.detected);
        }
        let mut counts = Self {
            levels_db: Vec::with_capacity(groups.len()),
            trials: Vec::with_capacity(groups.len()),
            successes: Vec::with_capacity(groups.len()),
        };
        for (level, (n, k)) in groups {
            counts.levels_db.push(level.into_inner());
            counts.trials.push(n);
            counts.successes.push(k);
        }
        counts
    }

    /// Number of distinct stimulus levels.
    pub fn len(&self) -> usize {
        self.levels_db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels_db.is_empty()
    }

    pub fn levels_db(&self) -> &[f64] {
        &self.levels_db
    }

    pub fn trials(&self) -> &[u32] {
        &self.trials
    }

    pub fn successes(&self) -> &[u32] {
        &self.successes
    }

    /// Total number of trials across levels; equals the source slice length.
    pub fn total_trials(&self) -> u32 {
        self.trials.iter().sum()
    }

    /// `(level_db, trials, successes)` triples in ascending level order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, u32, u32)> + '_ {
        itertools::izip!(
            self.levels_db.iter().copied(),
            self.trials.iter().copied(),
            self.successes.iter().copied()
        )
    }

    /// Observed detection rate per level, used as plotting weights.
    pub fn detection_rates(&self) -> Vec<f64> {
        self.trials
            .iter()
            .zip(&self.successes)
            .map(|(&n, &k)| f64::from(k) / f64::from(n))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence() -> TrialSequence {
        TrialSequence::new(vec![
            Trial { level_db: -20.0, detected: true },
            Trial { level_db: -26.0, detected: false },
            Trial { level_db: -20.0, detected: true },
            Trial { level_db: -14.0, detected: true },
            Trial { level_db: -26.0, detected: true },
            Trial { level_db: -20.0, detected: false },
        ])
    }

    #[test]
    fn counts_preserve_total() {
        let seq = sequence();
        let counts = OutcomeCounts::from_trials(seq.trials());
        assert_eq!(counts.total_trials() as usize, seq.len());
        for (_, n, k) in counts.iter() {
            assert!(n >= 1);
            assert!(k <= n);
        }
    }

    #[test]
    fn counts_group_by_exact_level() {
        let counts = OutcomeCounts::from_trials(sequence().trials());
        assert_eq!(counts.levels_db(), &[-26.0, -20.0, -14.0]);
        assert_eq!(counts.trials(), &[2, 3, 1]);
        assert_eq!(counts.successes(), &[1, 2, 1]);
    }

    #[test]
    fn prefix_counts_conserve_too() {
        let seq = sequence();
        for n in 1..=seq.len() {
            let counts = OutcomeCounts::from_trials(seq.prefix(n));
            assert_eq!(counts.total_trials() as usize, n);
        }
    }

    #[test]
    fn empty_slice_yields_no_levels() {
        let counts = OutcomeCounts::from_trials(&[]);
        assert!(counts.is_empty());
        assert_eq!(counts.total_trials(), 0);
    }

    #[test]
    fn detection_rates_match_counts() {
        let counts = OutcomeCounts::from_trials(sequence().trials());
        let rates = counts.detection_rates();
        assert_eq!(rates, vec![0.5, 2.0 / 3.0, 1.0]);
    }
}
