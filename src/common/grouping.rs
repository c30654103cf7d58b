use duckdb::core::{DataChunkHandle, Inserter};

/// A single output row from `verify_forecasts`.
///
/// Flat struct for easy row-by-row emission across DataChunk calls.
pub struct GroupMetricsRow {
    /// Values for each group column (same order as group_by).
    pub group_values: Vec<String>,
    pub period_start: i64,
    pub period_end: i64,
    pub samples: i64,
    pub brier: f64,
    pub reliability: f64,
    pub resolution: f64,
    pub skill: f64,
    pub bias: f64,
    pub sharpness: f64,
    pub base_rate: f64,
}

/// A single output row from `reliability_table`: one non-empty bin of one cell.
pub struct GroupBinRow {
    pub group_values: Vec<String>,
    pub period_start: i64,
    pub period_end: i64,
    pub bin: i64,
    pub midpoint: f64,
    pub avg_probability: f64,
    pub success_rate: f64,
    pub count: i64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// A single output row from `failure_attribution`.
pub struct GroupAttributionRow {
    pub group_values: Vec<String>,
    pub component: String,
    pub observed: i64,
    pub success_rate: f64,
    pub failure_share: f64,
}

/// Pre-computed rows plus the emission cursor shared by every table function.
///
/// Rows are computed once on the first `func()` call, then emitted in chunks
/// of at most `duckdb_vector_size()` rows.
pub struct RowBuffer<T> {
    pub rows: Vec<T>,
    pub position: usize,
    pub computed: bool,
}

impl<T> RowBuffer<T> {
    pub fn new() -> Self {
        RowBuffer {
            rows: Vec::new(),
            position: 0,
            computed: false,
        }
    }

    /// The next slice to emit, advancing the cursor. Empty once exhausted.
    pub fn next_chunk(&mut self, chunk_size: usize) -> &[T] {
        let start = self.position;
        let end = (start + chunk_size).min(self.rows.len());
        self.position = end;
        &self.rows[start..end]
    }
}

impl<T> Default for RowBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Write the leading VARCHAR group columns of a chunk.
pub fn write_group_columns<'a, I>(
    output: &mut DataChunkHandle,
    num_group_cols: usize,
    rows: I,
) -> Result<(), Box<dyn std::error::Error>>
where
    I: Iterator<Item = &'a [String]> + Clone,
{
    for g in 0..num_group_cols {
        let vec = output.flat_vector(g);
        for (row_offset, values) in rows.clone().enumerate() {
            let value = values.get(g).ok_or_else(|| {
                format!(
                    "Internal error: expected {} group columns, got {}",
                    num_group_cols,
                    values.len()
                )
            })?;
            vec.insert(row_offset, value.as_str());
        }
    }
    Ok(())
}
