//! Series frames: the raw rows/series payload exchanged with backends.
//!
//! A frame is an arrow `RecordBatch` tagged with the query key that produced
//! it and a series name. Graph frames are strictly two fields (time, value);
//! log frames carry time/level/line columns.

use std::sync::Arc;

use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;

pub const TIME_FIELD: &str = "time";
pub const VALUE_FIELD: &str = "value";
pub const LEVEL_FIELD: &str = "level";
pub const LINE_FIELD: &str = "line";

/// One named series of raw rows from a backend.
#[derive(Debug, Clone)]
pub struct SeriesFrame {
    /// Key of the query row that produced this frame.
    pub key: String,
    /// Series name; the merge identity together with `key`.
    pub name: String,
    pub batch: RecordBatch,
}

impl SeriesFrame {
    pub fn new(key: impl Into<String>, name: impl Into<String>, batch: RecordBatch) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            batch,
        }
    }

    /// Builds a two-field (time, value) frame from points.
    pub fn points(
        key: impl Into<String>,
        name: impl Into<String>,
        points: &[(i64, f64)],
    ) -> Self {
        let schema = Arc::new(Schema::new(vec![
            Field::new(TIME_FIELD, DataType::Int64, false),
            Field::new(VALUE_FIELD, DataType::Float64, false),
        ]));
        let times = Int64Array::from_iter_values(points.iter().map(|(t, _)| *t));
        let values = Float64Array::from_iter_values(points.iter().map(|(_, v)| *v));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(times), Arc::new(values)])
            .expect("point arrays match the series schema");
        Self::new(key, name, batch)
    }

    /// Builds a log frame from (time, level, line) rows.
    pub fn log_lines(key: impl Into<String>, lines: &[(i64, &str, &str)]) -> Self {
        let schema = Arc::new(Schema::new(vec![
            Field::new(TIME_FIELD, DataType::Int64, false),
            Field::new(LEVEL_FIELD, DataType::Utf8, false),
            Field::new(LINE_FIELD, DataType::Utf8, false),
        ]));
        let times = Int64Array::from_iter_values(lines.iter().map(|(t, _, _)| *t));
        let levels = StringArray::from_iter_values(lines.iter().map(|(_, l, _)| *l));
        let entries = StringArray::from_iter_values(lines.iter().map(|(_, _, e)| *e));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(times), Arc::new(levels), Arc::new(entries)],
        )
        .expect("log arrays match the log schema");
        let key = key.into();
        Self::new(key.clone(), format!("logs-{key}"), batch)
    }

    pub fn rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    /// Strictly two fields: a time-like first column and a numeric second.
    pub fn is_timeseries(&self) -> bool {
        let schema = self.batch.schema();
        if schema.fields().len() != 2 {
            return false;
        }
        is_time_like(schema.field(0).data_type()) && is_numeric(schema.field(1).data_type())
    }

    /// Appends `newer` after this frame. A schema mismatch means the series
    /// changed shape mid-flight; the newer frame wins in that case.
    pub fn concat(&self, newer: &SeriesFrame) -> SeriesFrame {
        if self.batch.schema() != newer.batch.schema() {
            tracing::debug!(key = %self.key, name = %self.name, "schema changed, replacing series");
            return newer.clone();
        }
        match concat_batches(&self.batch.schema(), [&self.batch, &newer.batch]) {
            Ok(batch) => SeriesFrame::new(self.key.clone(), self.name.clone(), batch),
            Err(err) => {
                tracing::debug!(%err, "concat failed, replacing series");
                newer.clone()
            }
        }
    }

    /// Time column values, for assertions and log extraction.
    pub fn time_values(&self) -> Vec<i64> {
        self.batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| a.values().to_vec())
            .unwrap_or_default()
    }

    /// Numeric values of the second column of a timeseries frame.
    pub fn numeric_values(&self) -> Vec<f64> {
        if self.batch.num_columns() < 2 {
            return Vec::new();
        }
        self.batch
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .map(|a| a.values().to_vec())
            .unwrap_or_default()
    }
}

fn is_time_like(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int64 | DataType::Timestamp(TimeUnit::Millisecond, _)
    )
}

fn is_numeric(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Float64 | DataType::Float32 | DataType::Int64 | DataType::Int32
    )
}
