use chrono::{DateTime, Utc};
use datafusion::arrow::datatypes::DataType;
use datafusion::arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::proto::chat;

/// Semantic column type exposed to the language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Date,
    Int,
    Float,
    String,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Date => "date",
            ColumnKind::Int => "int",
            ColumnKind::Float => "float",
            ColumnKind::String => "string",
        }
    }

    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnKind::Date => DataType::Date32,
            ColumnKind::Int => DataType::Int64,
            ColumnKind::Float => DataType::Float64,
            ColumnKind::String => DataType::Utf8,
        }
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnKind,
}

/// One uploaded CSV file materialized as a queryable table.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub source_name: String,
    pub columns: Vec<ColumnSpec>,
    pub batch: RecordBatch,
}

impl Table {
    pub fn row_count(&self) -> usize {
        self.batch.num_rows()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFailure {
    pub source_name: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub tables: Vec<Table>,
    pub failures: Vec<DatasetFailure>,
}

/// Column name to scalar value, in result column order.
pub type QueryRow = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub session_id: Uuid,
    pub question: String,
    pub answer: String,
    pub source_filename: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(
        session_id: Uuid,
        question: impl Into<String>,
        answer: impl Into<String>,
        source_filename: Option<String>,
    ) -> Self {
        Self {
            session_id,
            question: question.into(),
            answer: answer.into(),
            source_filename,
            created_at: Utc::now(),
        }
    }
}

impl From<&Table> for chat::TableInfo {
    fn from(table: &Table) -> Self {
        Self {
            name: table.name.clone(),
            source_name: table.source_name.clone(),
            columns: table
                .columns
                .iter()
                .map(|col| chat::ColumnInfo {
                    name: col.name.clone(),
                    data_type: col.kind.to_string(),
                })
                .collect(),
            row_count: table.row_count() as i64,
        }
    }
}

impl From<DatasetFailure> for chat::DatasetFailure {
    fn from(failure: DatasetFailure) -> Self {
        Self {
            source_name: failure.source_name,
            message: failure.message,
        }
    }
}

impl From<ChatTurn> for chat::ChatTurn {
    fn from(turn: ChatTurn) -> Self {
        Self {
            session_id: turn.session_id.to_string(),
            question: turn.question,
            answer: turn.answer,
            source_filename: turn.source_filename.unwrap_or_default(),
            created_at: turn.created_at.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_info_reports_semantic_types() {
        let table =
            crate::loader::load_table("Table1", "sales.csv", b"date,qty,price,name\n2024-01-01,1,2.5,X\n")
                .unwrap();

        let info = chat::TableInfo::from(&table);

        let types: Vec<_> = info.columns.iter().map(|c| c.data_type.as_str()).collect();
        assert_eq!(types, vec!["date", "int", "float", "string"]);
        assert_eq!(info.row_count, 1);
    }
}
