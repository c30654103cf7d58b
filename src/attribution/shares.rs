use serde::{Deserialize, Serialize};

use crate::common::error::{VerifyError, VerifyResult};
use crate::common::types::{round_to_hundredths, GroupKey};

/// Observed results of one component factor within a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentTally {
    pub successes: u64,
    pub failures: u64,
}

impl ComponentTally {
    pub fn observed(&self) -> u64 {
        self.successes + self.failures
    }

    /// Fraction of observed results that were successes, or 0 when nothing
    /// was observed.
    pub fn success_rate(&self) -> f64 {
        match self.observed() {
            0 => 0.0,
            n => self.successes as f64 / n as f64,
        }
    }
}

/// Count successes and failures per component column, ignoring missing values.
///
/// Every row must have exactly `components` entries.
pub fn tally(rows: &[Vec<Option<bool>>], components: usize) -> VerifyResult<Vec<ComponentTally>> {
    let mut tallies = vec![ComponentTally::default(); components];
    for row in rows {
        if row.len() != components {
            return Err(VerifyError::Inconsistent(format!(
                "outcome row has {} components, expected {}",
                row.len(),
                components
            )));
        }
        for (tally, outcome) in tallies.iter_mut().zip(row) {
            match outcome {
                Some(true) => tally.successes += 1,
                Some(false) => tally.failures += 1,
                None => {}
            }
        }
    }
    Ok(tallies)
}

/// Share of failure attributable to each component: `(1 - r_i) / Σ(1 - r_j)`.
///
/// When no component ever failed the denominator is 0 and every share is 0.
pub fn failure_shares(success_rates: &[f64]) -> Vec<f64> {
    let total_failure: f64 = success_rates.iter().map(|r| 1.0 - r).sum();
    if total_failure <= 0.0 {
        return vec![0.0; success_rates.len()];
    }
    success_rates
        .iter()
        .map(|r| (1.0 - r) / total_failure)
        .collect()
}

/// Failure attribution for one component of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentAttribution {
    pub group: GroupKey,
    pub component: String,
    pub observed: u64,
    /// Success rate rounded to two decimals; the shares are computed from it.
    pub success_rate: f64,
    pub failure_share: f64,
}

/// Attribute each group's failures across its components.
///
/// Rates are rounded to two decimals before the shares are taken, so the
/// shares match the rates as reported.
pub fn attribute_failures<'a, I>(
    groups: I,
    components: &[String],
) -> VerifyResult<Vec<ComponentAttribution>>
where
    I: IntoIterator<Item = (&'a GroupKey, &'a Vec<Vec<Option<bool>>>)>,
{
    if components.is_empty() {
        return Err(VerifyError::InvalidConfig(
            "at least one outcome component is required".to_string(),
        ));
    }

    let mut out = Vec::new();
    for (group, rows) in groups {
        let tallies = tally(rows, components.len())?;
        let rates: Vec<f64> = tallies
            .iter()
            .map(|t| round_to_hundredths(t.success_rate()))
            .collect();
        let shares = failure_shares(&rates);

        for ((component, tally), (rate, share)) in components
            .iter()
            .zip(&tallies)
            .zip(rates.iter().zip(&shares))
        {
            out.push(ComponentAttribution {
                group: group.clone(),
                component: component.clone(),
                observed: tally.observed(),
                success_rate: *rate,
                failure_share: *share,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_shares_sum_to_one() {
        let shares = failure_shares(&[0.8, 0.5, 0.7]);
        // failures 0.2, 0.5, 0.3 over a total of 1.0
        assert!((shares[0] - 0.2).abs() < 1e-12);
        assert!((shares[1] - 0.5).abs() < 1e-12);
        assert!((shares[2] - 0.3).abs() < 1e-12);
        assert!((shares.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_failures_gives_zero_shares() {
        assert_eq!(failure_shares(&[1.0, 1.0]), vec![0.0, 0.0]);
        assert!(failure_shares(&[]).is_empty());
    }

    #[test]
    fn test_tally_ignores_missing() {
        let rows = vec![
            vec![Some(true), None],
            vec![Some(false), Some(true)],
            vec![Some(true), Some(true)],
        ];
        let t = tally(&rows, 2).unwrap();
        assert_eq!(t[0], ComponentTally { successes: 2, failures: 1 });
        assert_eq!(t[1], ComponentTally { successes: 2, failures: 0 });
        assert_eq!(t[1].observed(), 2);
        assert_eq!(ComponentTally::default().success_rate(), 0.0);
    }

    #[test]
    fn test_tally_rejects_ragged_rows() {
        assert!(tally(&[vec![Some(true)]], 2).is_err());
    }

    #[test]
    fn test_attribute_failures_per_group() {
        let components = vec!["reservoir".to_string(), "source".to_string(), "trap".to_string()];
        let mut groups = BTreeMap::new();
        groups.insert(
            vec!["north sea".to_string()],
            vec![
                vec![Some(true), Some(true), Some(false)],
                vec![Some(false), Some(true), Some(false)],
            ],
        );
        groups.insert(
            vec!["barents sea".to_string()],
            vec![vec![Some(true), Some(true), Some(true)]],
        );

        let rows = attribute_failures(&groups, &components).unwrap();
        assert_eq!(rows.len(), 6);

        // BTreeMap order puts barents first; nothing failed there.
        assert_eq!(rows[0].group, vec!["barents sea".to_string()]);
        assert!(rows[..3].iter().all(|r| r.failure_share == 0.0));

        // north sea rates 0.5, 1.0, 0.0 -> failures 0.5, 0, 1 over 1.5
        let north = &rows[3..];
        assert_eq!(north[0].component, "reservoir");
        assert!((north[0].failure_share - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(north[1].failure_share, 0.0);
        assert!((north[2].failure_share - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(north[2].observed, 2);
    }

    #[test]
    fn test_shares_use_rounded_rates() {
        let components = vec!["source".to_string(), "trap".to_string()];
        let mut groups = BTreeMap::new();
        groups.insert(
            vec!["north sea".to_string()],
            vec![
                vec![Some(true), Some(true)],
                vec![Some(true), Some(false)],
                vec![Some(false), Some(false)],
            ],
        );

        let rows = attribute_failures(&groups, &components).unwrap();
        assert_eq!(rows[0].success_rate, 0.67);
        assert_eq!(rows[1].success_rate, 0.33);
        // failures 0.33 and 0.67 over a total of 1.0
        assert!((rows[0].failure_share - 0.33).abs() < 1e-12);
        assert!((rows[1].failure_share - 0.67).abs() < 1e-12);
    }

    #[test]
    fn test_attribute_failures_requires_components() {
        let groups: BTreeMap<GroupKey, Vec<Vec<Option<bool>>>> = BTreeMap::new();
        assert!(attribute_failures(&groups, &[]).is_err());
    }
}
