use duckdb::vtab::BindInfo;

use crate::common::params::{get_list_param, get_string_param};

/// Parsed and validated parameters for the failure_attribution() table function.
pub struct AttributionParams {
    pub table_name: String,
    pub outcomes: Vec<String>,
    pub group_by: Vec<String>,
    pub implied_by: Option<String>,
}

impl AttributionParams {
    /// Extract and validate parameters from the VTab bind info.
    pub fn from_bind_info(bind: &BindInfo) -> Result<Self, Box<dyn std::error::Error>> {
        let table_name = bind.get_parameter(0).to_string();
        let outcomes = get_list_param(bind, "outcomes")?;
        let group_by = get_list_param(bind, "group_by")?;
        let implied_by = get_string_param(bind, "implied_by").filter(|s| !s.is_empty());

        if table_name.is_empty() {
            return Err("table name cannot be empty".into());
        }
        if outcomes.is_empty() {
            return Err("outcomes must name at least one component column".into());
        }

        Ok(AttributionParams {
            table_name,
            outcomes,
            group_by,
            implied_by,
        })
    }
}
