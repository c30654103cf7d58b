//! Upstream normalization rules applied to raw table values before they
//! become [`ForecastSample`](super::types::ForecastSample)s.
//!
//! The verification engine never sees raw codes; it relies on these rules
//! having run.

use super::error::{VerifyError, VerifyResult};

/// Map a raw outcome code to a boolean.
///
/// Accepted (case-insensitive, surrounding whitespace ignored):
/// `yes`, `ok`, `true`, `1`, `1.0` and `no`, `fail`, `false`, `0`, `0.0`.
/// Anything else is rejected rather than coerced.
pub fn normalize_outcome(raw: &str) -> VerifyResult<bool> {
    let code = raw.trim().to_ascii_lowercase();
    match code.as_str() {
        "yes" | "ok" | "true" | "1" | "1.0" => Ok(true),
        "no" | "fail" | "false" | "0" | "0.0" => Ok(false),
        _ => Err(VerifyError::InvalidOutcome(raw.to_string())),
    }
}

/// Like [`normalize_outcome`] but passes NULL through as `None`.
pub fn normalize_optional(raw: Option<&str>) -> VerifyResult<Option<bool>> {
    raw.map(normalize_outcome).transpose()
}

/// Fallback for missing component results once the overall outcome is known:
/// a confirmed success of the implying outcome (e.g. a discovery) means every
/// required component succeeded, so a missing component result is filled in
/// as `true`. Recorded results are never overridden, and a missing result
/// stays missing when the implying outcome is not a confirmed success.
pub fn resolve_implied(outcome: Option<bool>, implied_by: Option<bool>) -> Option<bool> {
    match (outcome, implied_by) {
        (Some(o), _) => Some(o),
        (None, Some(true)) => Some(true),
        (None, _) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_normalize_case_insensitively() {
        for code in ["YES", "yes", "Ok", " OK ", "true", "1", "1.0"] {
            assert!(normalize_outcome(code).unwrap(), "{code}");
        }
        for code in ["NO", "no", "Fail", "FAIL", "false", "0", "0.0"] {
            assert!(!normalize_outcome(code).unwrap(), "{code}");
        }
    }

    #[test]
    fn test_unknown_codes_are_rejected() {
        for code in ["maybe", "2", "0.5", ""] {
            assert!(matches!(
                normalize_outcome(code),
                Err(VerifyError::InvalidOutcome(_))
            ));
        }
    }

    #[test]
    fn test_optional_passes_null_through() {
        assert_eq!(normalize_optional(None).unwrap(), None);
        assert_eq!(normalize_optional(Some("ok")).unwrap(), Some(true));
        assert!(normalize_optional(Some("?")).is_err());
    }

    #[test]
    fn test_implied_rule_only_fills_missing_values() {
        assert_eq!(resolve_implied(None, Some(true)), Some(true));
        assert_eq!(resolve_implied(Some(false), Some(true)), Some(false));
        assert_eq!(resolve_implied(None, Some(false)), None);
        assert_eq!(resolve_implied(None, None), None);
        assert_eq!(resolve_implied(Some(true), None), Some(true));
    }
}
