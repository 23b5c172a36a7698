use std::sync::Arc;

use datafusion::arrow::array::*;
use datafusion::arrow::datatypes::DataType;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::arrow::util::display::array_value_to_string;
use datafusion::common::TableReference;
use datafusion::datasource::MemTable;
use datafusion::execution::config::SessionConfig;
use datafusion::execution::context::{SQLOptions, SessionContext};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{QueryRow, Table};
use crate::error::AnalysisError;

/// DataFusion context holding exactly one generation of session tables.
pub struct DataFusionEngine {
    ctx: SessionContext,
    generation: Vec<String>,
}

impl DataFusionEngine {
    pub fn new() -> Self {
        let mut session_config = SessionConfig::new();
        // Table and column names are matched exactly as listed in the schema.
        session_config
            .options_mut()
            .sql_parser
            .enable_ident_normalization = false;

        Self {
            ctx: SessionContext::new_with_config(session_config),
            generation: Vec::new(),
        }
    }

    pub fn table_names(&self) -> &[String] {
        &self.generation
    }

    /// Swaps in a new table generation. Nothing from the old one stays queryable.
    ///
    /// If the providers cannot be built nothing changes. If the swap itself
    /// fails the engine is left empty rather than holding a mix of generations.
    pub fn replace_generation(&mut self, tables: &[Table]) -> Result<(), AnalysisError> {
        let providers = tables
            .iter()
            .map(|table| {
                MemTable::try_new(table.batch.schema(), vec![vec![table.batch.clone()]])
                    .map(|provider| (table.name.clone(), Arc::new(provider)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let Err(e) = self.swap_in(providers) {
            warn!("Table swap failed, dropping every table: {}", e);
            self.reset();
            return Err(e);
        }
        Ok(())
    }

    /// Drops every table by starting over with a fresh context.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn swap_in(&mut self, providers: Vec<(String, Arc<MemTable>)>) -> Result<(), AnalysisError> {
        for name in self.generation.drain(..) {
            self.ctx.deregister_table(TableReference::bare(name.clone()))?;
            debug!("Deregistered table {}", name);
        }

        for (name, provider) in providers {
            self.ctx
                .register_table(TableReference::bare(name.clone()), provider)?;
            info!("Registered table {} with DataFusion", name);
            self.generation.push(name);
        }

        Ok(())
    }

    /// Runs one read-only statement and returns its rows.
    pub async fn execute_query(&self, sql_query: &str) -> Result<Vec<QueryRow>, AnalysisError> {
        let start_time = std::time::Instant::now();
        let query = normalize_sql(sql_query);

        info!("Executing query: {}", query);

        let options = SQLOptions::new()
            .with_allow_ddl(false)
            .with_allow_dml(false)
            .with_allow_statements(false);

        let df = self
            .ctx
            .sql_with_options(&query, options)
            .await
            .map_err(|e| AnalysisError::InvalidSqlQuery {
                message: e.to_string(),
            })?;

        let batches = df
            .collect()
            .await
            .map_err(|e| AnalysisError::QueryExecutionFailed {
                message: e.to_string(),
            })?;

        let rows = batches_to_rows(&batches);
        info!(
            "Query completed with {} rows in {}ms",
            rows.len(),
            start_time.elapsed().as_millis()
        );

        Ok(rows)
    }

    pub async fn health_check(&self) -> Result<(), AnalysisError> {
        let _ = self.ctx.sql("SELECT 1 as health_check").await?;
        Ok(())
    }
}

impl Default for DataFusionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Drops stray backslashes the model sometimes emits as escapes.
pub fn normalize_sql(sql: &str) -> String {
    sql.replace('\\', "").trim().to_string()
}

pub fn batches_to_rows(batches: &[RecordBatch]) -> Vec<QueryRow> {
    let mut rows = Vec::new();
    for batch in batches {
        let schema = batch.schema();
        for row_idx in 0..batch.num_rows() {
            let mut row = QueryRow::new();
            for (col_idx, field) in schema.fields().iter().enumerate() {
                let value = extract_arrow_value(batch.column(col_idx).as_ref(), row_idx);
                row.insert(field.name().clone(), value);
            }
            rows.push(row);
        }
    }
    rows
}

fn extract_arrow_value(array: &dyn Array, index: usize) -> Value {
    if array.is_null(index) {
        return Value::Null;
    }

    let any = array.as_any();
    let value = match array.data_type() {
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map(|a| Value::Bool(a.value(index))),
        DataType::Int8 => any
            .downcast_ref::<Int8Array>()
            .map(|a| Value::from(a.value(index))),
        DataType::Int16 => any
            .downcast_ref::<Int16Array>()
            .map(|a| Value::from(a.value(index))),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map(|a| Value::from(a.value(index))),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map(|a| Value::from(a.value(index))),
        DataType::UInt8 => any
            .downcast_ref::<UInt8Array>()
            .map(|a| Value::from(a.value(index))),
        DataType::UInt16 => any
            .downcast_ref::<UInt16Array>()
            .map(|a| Value::from(a.value(index))),
        DataType::UInt32 => any
            .downcast_ref::<UInt32Array>()
            .map(|a| Value::from(a.value(index))),
        DataType::UInt64 => any
            .downcast_ref::<UInt64Array>()
            .map(|a| Value::from(a.value(index))),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .map(|a| Value::from(a.value(index) as f64)),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map(|a| Value::from(a.value(index))),
        DataType::Utf8 => any
            .downcast_ref::<StringArray>()
            .map(|a| Value::from(a.value(index))),
        DataType::LargeUtf8 => any
            .downcast_ref::<LargeStringArray>()
            .map(|a| Value::from(a.value(index))),
        DataType::Utf8View => any
            .downcast_ref::<StringViewArray>()
            .map(|a| Value::from(a.value(index))),
        DataType::Date32 => any.downcast_ref::<Date32Array>().map(|a| {
            let days = a.value(index);
            chrono::NaiveDate::from_num_days_from_ce_opt(days + 719163)
                .map(|d| Value::from(d.to_string()))
                .unwrap_or(Value::Null)
        }),
        DataType::Date64 => any.downcast_ref::<Date64Array>().map(|a| {
            chrono::DateTime::from_timestamp_millis(a.value(index))
                .map(|dt| Value::from(dt.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null)
        }),
        _ => None,
    };

    value.unwrap_or_else(|| {
        array_value_to_string(array, index)
            .map(Value::from)
            .unwrap_or(Value::Null)
    })
}
