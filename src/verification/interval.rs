use serde::{Deserialize, Serialize};
use statrs::distribution::{Binomial, DiscreteCDF};

use crate::common::error::{VerifyError, VerifyResult};
use crate::common::types::check_probability;

/// Slack when comparing a computed CDF against a target quantile, so a CDF
/// that should equal the target exactly is not pushed one count higher.
const CDF_TOLERANCE: f64 = 1e-12;

/// A confidence interval expressed as outcome rates in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Two-sided binomial quantile interval for `trials` draws at success
/// probability `probability`, divided by `trials`.
///
/// The bounds are the `(1 - c) / 2` and `(1 + c) / 2` quantiles of
/// Binomial(trials, probability), i.e. the smallest counts whose CDF reaches
/// each level. This is the band a perfectly reliable forecaster's observed
/// frequency falls into with probability `confidence_level`.
///
/// # Errors
/// `trials == 0` is a caller bug (empty bins must be filtered first) and
/// returns [`VerifyError::EmptyBin`].
pub fn binomial_interval(
    probability: f64,
    trials: u64,
    confidence_level: f64,
) -> VerifyResult<ConfidenceInterval> {
    if trials == 0 {
        return Err(VerifyError::EmptyBin { trials });
    }
    check_probability(probability)?;
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(VerifyError::InvalidConfig(format!(
            "confidence_level must be between 0.0 and 1.0 (exclusive), got {}",
            confidence_level
        )));
    }

    // Degenerate distributions put all mass on one count.
    if probability == 0.0 {
        return Ok(ConfidenceInterval {
            lower: 0.0,
            upper: 0.0,
        });
    }
    if probability == 1.0 {
        return Ok(ConfidenceInterval {
            lower: 1.0,
            upper: 1.0,
        });
    }

    let dist = Binomial::new(probability, trials).map_err(|e| {
        VerifyError::InvalidConfig(format!("failed to create binomial distribution: {}", e))
    })?;

    let alpha = 1.0 - confidence_level;
    let lower = quantile(&dist, trials, alpha / 2.0);
    let upper = quantile(&dist, trials, 1.0 - alpha / 2.0);

    Ok(ConfidenceInterval {
        lower: lower as f64 / trials as f64,
        upper: upper as f64 / trials as f64,
    })
}

/// Smallest count `k` in `0..=trials` with `CDF(k) >= q`.
fn quantile(dist: &Binomial, trials: u64, q: f64) -> u64 {
    (0..=trials)
        .find(|&k| dist.cdf(k) + CDF_TOLERANCE >= q)
        .unwrap_or(trials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_symmetric_interval() {
        // Binomial(10, 0.5): CDF(2)=0.055, CDF(3)=0.172, CDF(6)=0.828, CDF(7)=0.945
        let ci = binomial_interval(0.5, 10, 0.8).unwrap();
        assert!((ci.lower - 0.3).abs() < 1e-12);
        assert!((ci.upper - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_skewed_interval() {
        // Binomial(5, 0.05): CDF(0)=0.774, CDF(1)=0.977
        let ci = binomial_interval(0.05, 5, 0.8).unwrap();
        assert_eq!(ci.lower, 0.0);
        assert!((ci.upper - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_wider_confidence_is_wider() {
        let narrow = binomial_interval(0.35, 40, 0.5).unwrap();
        let wide = binomial_interval(0.35, 40, 0.95).unwrap();
        assert!(wide.lower <= narrow.lower);
        assert!(wide.upper >= narrow.upper);
    }

    #[test]
    fn test_degenerate_probabilities() {
        let zero = binomial_interval(0.0, 7, 0.8).unwrap();
        assert_eq!((zero.lower, zero.upper), (0.0, 0.0));
        let one = binomial_interval(1.0, 7, 0.8).unwrap();
        assert_eq!((one.lower, one.upper), (1.0, 1.0));
    }

    #[test]
    fn test_empty_bin_is_an_error() {
        assert!(matches!(
            binomial_interval(0.5, 0, 0.8),
            Err(VerifyError::EmptyBin { trials: 0 })
        ));
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(matches!(
            binomial_interval(1.5, 10, 0.8),
            Err(VerifyError::InvalidProbability(_))
        ));
        assert!(matches!(
            binomial_interval(0.5, 10, 1.0),
            Err(VerifyError::InvalidConfig(_))
        ));
        assert!(binomial_interval(0.5, 10, 0.0).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_bounds_bracket_probability(
            p in 0.0f64..=1.0,
            trials in 1u64..=60,
            c in 0.05f64..0.99,
        ) {
            let ci = binomial_interval(p, trials, c).unwrap();
            let step = 1.0 / trials as f64;
            prop_assert!(ci.lower >= 0.0);
            prop_assert!(ci.upper <= 1.0);
            prop_assert!(ci.lower <= ci.upper);
            prop_assert!(ci.lower <= p + step);
            prop_assert!(ci.upper + step >= p);
        }
    }
}
