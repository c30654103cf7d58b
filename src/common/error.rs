use thiserror::Error;

/// Errors raised while validating samples, configuring a run, or reading the
/// source table.
///
/// Degenerate-but-valid inputs (an empty cell, outcomes with zero variance)
/// are not errors; they resolve to zero-valued metrics instead.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// A forecast probability outside `[0, 1]` or not finite.
    #[error("probability must be within [0, 1], got {0}")]
    InvalidProbability(f64),

    /// An observed outcome that is not one of the binary codes.
    #[error("outcome must be binary (0/1), got '{0}'")]
    InvalidOutcome(String),

    /// A confidence interval was requested for a bin with no samples.
    /// Callers must filter empty bins first.
    #[error("confidence interval requested for an empty bin ({trials} trials)")]
    EmptyBin { trials: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A sample's group key does not match the configured group dimensions.
    #[error("group key has {found} labels, expected {expected}")]
    GroupArity { expected: usize, found: usize },

    /// Aggregates disagree with the raw samples they were built from.
    #[error("internal consistency fault: {0}")]
    Inconsistent(String),

    #[error("query failed: {0}")]
    Query(#[from] duckdb::Error),

    #[error("{0}")]
    Source(String),
}

/// Result alias used throughout the crate.
pub type VerifyResult<T> = Result<T, VerifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offending_value() {
        assert_eq!(
            VerifyError::InvalidProbability(1.5).to_string(),
            "probability must be within [0, 1], got 1.5"
        );
        assert_eq!(
            VerifyError::InvalidOutcome("maybe".into()).to_string(),
            "outcome must be binary (0/1), got 'maybe'"
        );
        assert_eq!(
            VerifyError::GroupArity { expected: 2, found: 1 }.to_string(),
            "group key has 1 labels, expected 2"
        );
    }
}
