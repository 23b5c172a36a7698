use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use datafusion::arrow::array::{ArrayRef, Date32Array, Float64Array, Int64Array, StringArray};
use datafusion::arrow::datatypes::{Field, Schema};
use datafusion::arrow::record_batch::RecordBatch;
use tracing::{info, warn};

use crate::archive::CsvEntry;
use crate::domain::{ColumnKind, ColumnSpec, DatasetFailure, LoadReport, Table};
use crate::error::AnalysisError;

const DATE_COLUMN: &str = "date";

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

pub fn synthetic_table_name(index: usize) -> String {
    format!("Table{}", index + 1)
}

pub fn sanitize_column_name(raw: &str) -> String {
    raw.trim().replace(' ', "_")
}

/// Loads every dataset independently; one bad file never blocks its siblings.
pub fn load_tables(entries: &[CsvEntry]) -> LoadReport {
    let mut report = LoadReport::default();

    for (index, entry) in entries.iter().enumerate() {
        let name = synthetic_table_name(index);
        match load_table(&name, &entry.source_name, &entry.data) {
            Ok(table) => {
                info!(
                    "Loaded '{}' as {} ({} columns, {} rows)",
                    entry.source_name,
                    name,
                    table.columns.len(),
                    table.row_count()
                );
                report.tables.push(table);
            }
            Err(e) => {
                warn!("Skipping dataset '{}': {}", entry.source_name, e);
                report.failures.push(DatasetFailure {
                    source_name: entry.source_name.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    report
}

pub fn load_table(name: &str, source_name: &str, data: &[u8]) -> Result<Table, AnalysisError> {
    let load_error = |message: String| AnalysisError::DatasetLoad {
        source_name: source_name.to_string(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| load_error(format!("unreadable header row: {}", e)))?
        .clone();
    if headers.is_empty() {
        return Err(load_error("missing header row".to_string()));
    }

    let mut seen = HashSet::new();
    let mut column_names = Vec::with_capacity(headers.len());
    for (position, header) in headers.iter().enumerate() {
        let column = match sanitize_column_name(header) {
            empty if empty.is_empty() => format!("column_{}", position + 1),
            sanitized => sanitized,
        };
        if !seen.insert(column.clone()) {
            return Err(load_error(format!("duplicate column '{}'", column)));
        }
        column_names.push(column);
    }

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); column_names.len()];
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| load_error(format!("row {}: {}", line + 1, e)))?;
        for (column, value) in cells.iter_mut().zip(record.iter()) {
            column.push(value.to_string());
        }
    }

    let mut fields = Vec::with_capacity(column_names.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(column_names.len());
    let mut columns = Vec::with_capacity(column_names.len());

    for (column_name, values) in column_names.into_iter().zip(cells) {
        let kind = infer_column_kind(&column_name, &values);
        fields.push(Field::new(&column_name, kind.arrow_type(), true));
        arrays.push(build_array(kind, &values));
        columns.push(ColumnSpec {
            name: column_name,
            kind,
        });
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;

    Ok(Table {
        name: name.to_string(),
        source_name: source_name.to_string(),
        columns,
        batch,
    })
}

/// A column named exactly `date` is always a date; others are typed by their non-empty cells.
pub fn infer_column_kind(column_name: &str, values: &[String]) -> ColumnKind {
    if column_name == DATE_COLUMN {
        return ColumnKind::Date;
    }

    let mut present = values.iter().filter(|v| !v.is_empty()).peekable();
    if present.peek().is_none() {
        return ColumnKind::String;
    }

    let mut all_int = true;
    for value in present {
        if value.parse::<i64>().is_ok() {
            continue;
        }
        all_int = false;
        match value.parse::<f64>() {
            Ok(parsed) if parsed.is_finite() => continue,
            _ => return ColumnKind::String,
        }
    }

    if all_int {
        ColumnKind::Int
    } else {
        ColumnKind::Float
    }
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
                .map(|dt| dt.date())
        })
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    date.signed_duration_since(DateTime::<Utc>::UNIX_EPOCH.date_naive())
        .num_days() as i32
}

fn build_array(kind: ColumnKind, values: &[String]) -> ArrayRef {
    let present = |v: &String| if v.is_empty() { None } else { Some(v.clone()) };
    match kind {
        ColumnKind::Date => Arc::new(Date32Array::from(
            values
                .iter()
                .map(|v| parse_date(v).map(days_since_epoch))
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Int => Arc::new(Int64Array::from(
            values
                .iter()
                .map(|v| v.parse::<i64>().ok())
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Float => Arc::new(Float64Array::from(
            values
                .iter()
                .map(|v| v.parse::<f64>().ok())
                .collect::<Vec<_>>(),
        )),
        ColumnKind::String => Arc::new(StringArray::from(
            values.iter().map(present).collect::<Vec<_>>(),
        )),
    }
}
