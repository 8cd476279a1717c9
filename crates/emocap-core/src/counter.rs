//! Per-label sample counts shown to the operator.

use crate::labels::Emotion;
use std::collections::{BTreeMap, HashMap};

/// In-memory count of saved samples per label. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct SampleCounter {
    counts: HashMap<Emotion, u64>,
}

impl SampleCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing per-label row counts (e.g. read from the dataset file).
    ///
    /// Names outside the label vocabulary are skipped.
    pub fn seeded(rows: &BTreeMap<String, u64>) -> Self {
        let mut counts = HashMap::new();
        for (name, &n) in rows {
            match name.parse::<Emotion>() {
                Ok(label) => {
                    counts.insert(label, n);
                }
                Err(e) => tracing::debug!(error = %e, "not seeding counter"),
            }
        }
        Self { counts }
    }

    /// Count for `label`; 0 if nothing was saved under it.
    pub fn get(&self, label: Emotion) -> u64 {
        self.counts.get(&label).copied().unwrap_or(0)
    }

    /// Add one sample under `label` and return the new count.
    pub fn increment(&mut self, label: Emotion) -> u64 {
        let count = self.counts.entry(label).or_insert(0);
        *count += 1;
        *count
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Non-zero counts in label order.
    pub fn snapshot(&self) -> BTreeMap<Emotion, u64> {
        self.counts
            .iter()
            .filter(|(_, &n)| n > 0)
            .map(|(&label, &n)| (label, n))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_label_is_zero() {
        let counter = SampleCounter::new();
        for e in Emotion::ALL {
            assert_eq!(counter.get(e), 0);
        }
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn test_increment_only_touches_one_label() {
        let mut counter = SampleCounter::new();
        for expected in 1..=5 {
            assert_eq!(counter.increment(Emotion::Fear), expected);
        }
        assert_eq!(counter.get(Emotion::Fear), 5);
        for e in Emotion::ALL.into_iter().filter(|&e| e != Emotion::Fear) {
            assert_eq!(counter.get(e), 0);
        }
        assert_eq!(counter.snapshot(), BTreeMap::from([(Emotion::Fear, 5)]));
    }

    #[test]
    fn test_seeded_skips_unknown_names() {
        let rows = BTreeMap::from([
            ("happy".to_string(), 12),
            ("sad".to_string(), 3),
            ("contempt".to_string(), 9),
        ]);
        let mut counter = SampleCounter::seeded(&rows);
        assert_eq!(counter.get(Emotion::Happy), 12);
        assert_eq!(counter.get(Emotion::Sad), 3);
        assert_eq!(counter.total(), 15);
        assert_eq!(counter.increment(Emotion::Happy), 13);
    }
}
