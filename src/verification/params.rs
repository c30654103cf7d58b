use duckdb::vtab::BindInfo;

use super::binning::{BinSpec, MAX_BINS};
use super::runner::{DEFAULT_CONFIDENCE_LEVEL, FEATURE_DIMENSION};
use crate::common::params::{get_column_param, get_int_list_param, get_list_param, get_string_param};
use crate::common::table_reader::{FeatureColumns, InvalidRowPolicy, SampleSource};

/// Bin count used when none is given (0.1-wide bins).
pub const DEFAULT_BINS: i64 = 10;

/// Parsed and validated parameters shared by verify_forecasts() and
/// reliability_table().
pub struct VerificationParams {
    pub table_name: String,
    /// Probability/outcome column pairs. A single unnamed pair comes from
    /// `probability`/`outcome`; the list form from `probabilities`/`outcomes`.
    pub features: Vec<FeatureColumns>,
    /// Whether results carry a `feature` key column (list form only).
    pub tag_features: bool,
    pub period_col: String,
    pub group_by: Vec<String>,
    /// Period cut points; empty means one period spanning all data.
    pub periods: Vec<i64>,
    pub bins: BinSpec,
    pub confidence_level: f64,
    pub implied_by: Option<String>,
    pub on_invalid: InvalidRowPolicy,
}

impl VerificationParams {
    /// Extract and validate parameters from the VTab bind info.
    pub fn from_bind_info(bind: &BindInfo) -> Result<Self, Box<dyn std::error::Error>> {
        // Positional parameter: table name
        let table_name = bind.get_parameter(0).to_string();

        let probabilities = get_list_param(bind, "probabilities")?;
        let tag_features = !probabilities.is_empty();
        let features = if tag_features {
            if bind.get_named_parameter("probability").is_some()
                || bind.get_named_parameter("outcome").is_some()
            {
                return Err(
                    "use either probability/outcome or probabilities/outcomes, not both".into(),
                );
            }
            let outcomes = get_list_param(bind, "outcomes")?;
            let names = get_list_param(bind, "features")?;
            feature_columns(probabilities, outcomes, names)?
        } else {
            vec![FeatureColumns {
                name: String::new(),
                probability_col: get_column_param(bind, "probability", "probability")?,
                outcome_col: get_column_param(bind, "outcome", "outcome")?,
            }]
        };
        let period_col = get_column_param(bind, "period", "year")?;

        let group_by = get_list_param(bind, "group_by")?;
        let periods = get_int_list_param(bind, "periods")?;

        let bins = bind
            .get_named_parameter("bins")
            .map(|v| v.to_int64())
            .unwrap_or(DEFAULT_BINS);

        let confidence_level = match bind.get_named_parameter("confidence_level") {
            Some(v) => {
                let s = v.to_string();
                s.parse::<f64>().map_err(|_| {
                    format!("confidence_level must be a valid number, got '{}'", s)
                })?
            }
            None => DEFAULT_CONFIDENCE_LEVEL,
        };

        let implied_by = get_string_param(bind, "implied_by").filter(|s| !s.is_empty());

        let on_invalid = match get_string_param(bind, "on_invalid") {
            Some(s) => InvalidRowPolicy::parse(&s)?,
            None => InvalidRowPolicy::Error,
        };

        // Validate
        if table_name.is_empty() {
            return Err("table name cannot be empty".into());
        }
        if bins <= 0 || bins > MAX_BINS as i64 {
            return Err(format!("bins must be between 1 and {}", MAX_BINS).into());
        }
        if confidence_level <= 0.0 || confidence_level >= 1.0 {
            return Err("confidence_level must be between 0.0 and 1.0 (exclusive)".into());
        }
        if periods.len() == 1 {
            return Err("periods needs at least 2 boundaries".into());
        }

        Ok(VerificationParams {
            table_name,
            features,
            tag_features,
            period_col,
            group_by,
            periods,
            bins: BinSpec::new(bins as usize)?,
            confidence_level,
            implied_by,
            on_invalid,
        })
    }

    pub fn source(&self) -> SampleSource<'_> {
        SampleSource {
            table_name: &self.table_name,
            period_col: &self.period_col,
            group_cols: &self.group_by,
            features: &self.features,
            tag_features: self.tag_features,
            implied_by: self.implied_by.as_deref(),
        }
    }

    /// Feature names handed to the runner; empty for the single-pair form.
    pub fn feature_names(&self) -> Vec<String> {
        if !self.tag_features {
            return Vec::new();
        }
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    /// Leading VARCHAR output columns: `group_by`, then `feature` for the
    /// list form.
    pub fn key_columns(&self) -> Vec<String> {
        let mut columns = self.group_by.clone();
        if self.tag_features {
            columns.push(FEATURE_DIMENSION.to_string());
        }
        columns
    }
}

/// Pair up `probabilities` and `outcomes`; `names` default to the
/// probability column names.
pub fn feature_columns(
    probabilities: Vec<String>,
    outcomes: Vec<String>,
    names: Vec<String>,
) -> Result<Vec<FeatureColumns>, Box<dyn std::error::Error>> {
    if outcomes.len() != probabilities.len() {
        return Err(format!(
            "outcomes must list one column per probability column ({} vs {})",
            outcomes.len(),
            probabilities.len()
        )
        .into());
    }
    if !names.is_empty() && names.len() != probabilities.len() {
        return Err(format!(
            "features must name every probability column ({} vs {})",
            names.len(),
            probabilities.len()
        )
        .into());
    }
    let names = if names.is_empty() {
        probabilities.clone()
    } else {
        names
    };

    Ok(probabilities
        .into_iter()
        .zip(outcomes)
        .zip(names)
        .map(|((probability_col, outcome_col), name)| FeatureColumns {
            name,
            probability_col,
            outcome_col,
        })
        .collect())
}
