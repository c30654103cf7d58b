use serde::{Deserialize, Serialize};

use super::binning::BinSpec;
use crate::common::error::VerifyResult;
use crate::common::types::ForecastSample;

/// Running totals for one bin of one cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BinAggregate {
    pub sum_probability: f64,
    pub count: u64,
    pub success_count: u64,
}

impl BinAggregate {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Mean forecast probability in the bin, or 0 for an empty bin.
    pub fn avg_probability(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_probability / self.count as f64
        }
    }

    /// Observed relative frequency of success, or 0 for an empty bin.
    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.count as f64
        }
    }

    fn add(&mut self, probability: f64, outcome: bool) {
        self.sum_probability += probability;
        self.count += 1;
        if outcome {
            self.success_count += 1;
        }
    }
}

/// Reduce samples into exactly `spec.slots()` bins.
///
/// Empty bins are kept (all zero) so that bin `i` means the same probability
/// range in every group.
pub fn aggregate<'a, I>(samples: I, spec: &BinSpec) -> VerifyResult<Vec<BinAggregate>>
where
    I: IntoIterator<Item = &'a ForecastSample>,
{
    let mut table = vec![BinAggregate::default(); spec.slots()];
    for sample in samples {
        let idx = spec.bin_index(sample.probability())?;
        table[idx].add(sample.probability(), sample.outcome());
    }
    Ok(table)
}

/// Same reduction over raw `(probability, outcome)` pairs.
pub fn aggregate_pairs(pairs: &[(f64, bool)], spec: &BinSpec) -> VerifyResult<Vec<BinAggregate>> {
    let mut table = vec![BinAggregate::default(); spec.slots()];
    for &(probability, outcome) in pairs {
        let idx = spec.bin_index(probability)?;
        table[idx].add(probability, outcome);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(p: f64, o: bool) -> ForecastSample {
        ForecastSample::new(p, o, vec!["all".to_string()], 2000).unwrap()
    }

    #[test]
    fn test_mixed_scenario_bins() {
        let probs = [0.1, 0.1, 0.1, 0.1, 0.1, 0.9, 0.9, 0.9, 0.9, 0.9];
        let outcomes = [false, false, false, false, true, true, true, true, true, false];
        let samples: Vec<ForecastSample> = probs
            .iter()
            .zip(outcomes.iter())
            .map(|(&p, &o)| sample(p, o))
            .collect();

        let spec = BinSpec::new(10).unwrap();
        let table = aggregate(&samples, &spec).unwrap();

        assert_eq!(table.len(), 11);
        assert_eq!(table[0].count, 5);
        assert_eq!(table[0].success_count, 1);
        assert_eq!(table[8].count, 5);
        assert_eq!(table[8].success_count, 4);
        let non_empty: Vec<usize> = (0..table.len()).filter(|&i| !table[i].is_empty()).collect();
        assert_eq!(non_empty, vec![0, 8]);
        assert!((table[0].avg_probability() - 0.1).abs() < 1e-12);
        assert!((table[8].success_rate() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input_keeps_every_slot() {
        let spec = BinSpec::new(5).unwrap();
        let table = aggregate(std::iter::empty::<&ForecastSample>(), &spec).unwrap();
        assert_eq!(table.len(), 6);
        assert!(table.iter().all(|b| b.is_empty() && b.sum_probability == 0.0));
        assert_eq!(table[3].avg_probability(), 0.0);
        assert_eq!(table[3].success_rate(), 0.0);
    }

    #[test]
    fn test_certain_forecast_goes_to_top_bin() {
        let spec = BinSpec::new(10).unwrap();
        let table = aggregate_pairs(&[(1.0, true)], &spec).unwrap();
        assert_eq!(table[10].count, 1);
        assert_eq!(table[10].success_count, 1);
    }

    #[test]
    fn test_invalid_probability_propagates() {
        let spec = BinSpec::new(10).unwrap();
        assert!(aggregate_pairs(&[(0.5, true), (1.5, false)], &spec).is_err());
    }

    proptest! {
        #[test]
        fn prop_counts_are_conserved(
            pairs in prop::collection::vec((0.0f64..=1.0, any::<bool>()), 0..200),
            bins in 1usize..=20,
        ) {
            let spec = BinSpec::new(bins).unwrap();
            let table = aggregate_pairs(&pairs, &spec).unwrap();
            prop_assert_eq!(table.len(), bins + 1);
            let total: u64 = table.iter().map(|b| b.count).sum();
            prop_assert_eq!(total as usize, pairs.len());
            for b in &table {
                prop_assert!(b.success_count <= b.count);
            }
        }
    }
}
