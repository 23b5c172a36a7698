use serde::{Deserialize, Serialize};

use crate::domain::{ColumnSpec, Table};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name == column)
    }
}

/// Every current table with its typed columns, in table-creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDescription {
    pub tables: Vec<TableSchema>,
}

impl SchemaDescription {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Renders the schema as the JSON listing embedded in prompts.
    pub fn render(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn tables_with_column(&self, column: &str) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.has_column(column))
            .map(|t| t.table.as_str())
            .collect()
    }

    /// `SELECT col FROM A UNION ALL SELECT col FROM B ...` over every table holding `column`.
    pub fn union_projection(&self, column: &str) -> Option<String> {
        let branches: Vec<String> = self
            .tables_with_column(column)
            .into_iter()
            .map(|table| format!("SELECT {} FROM {}", column, table))
            .collect();

        if branches.is_empty() {
            None
        } else {
            Some(branches.join(" UNION ALL "))
        }
    }

    /// Counts rows of the union, with the aggregate outside the union.
    pub fn count_over_union(&self, column: &str, predicate: Option<&str>) -> Option<String> {
        let union = self.union_projection(column)?;
        Some(match predicate {
            Some(predicate) => format!(
                "SELECT COUNT(*) AS count FROM ({}) AS combined WHERE {}",
                union, predicate
            ),
            None => format!("SELECT COUNT(*) AS count FROM ({}) AS combined", union),
        })
    }

    /// The column shared by the most tables, ties broken by first appearance.
    pub fn most_shared_column(&self) -> Option<&str> {
        let mut best: Option<(&str, usize)> = None;
        for table in &self.tables {
            for column in &table.columns {
                let count = self.tables_with_column(&column.name).len();
                if best.map_or(true, |(_, n)| count > n) {
                    best = Some((column.name.as_str(), count));
                }
            }
        }
        best.map(|(name, _)| name)
    }
}

/// Holds the schema of exactly one table generation.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    description: SchemaDescription,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every prior entry with the given tables.
    pub fn register(&mut self, tables: &[Table]) -> &SchemaDescription {
        self.description = SchemaDescription {
            tables: tables
                .iter()
                .map(|table| TableSchema {
                    table: table.name.clone(),
                    columns: table.columns.clone(),
                })
                .collect(),
        };
        &self.description
    }

    pub fn description(&self) -> &SchemaDescription {
        &self.description
    }

    pub fn describe(&self) -> String {
        self.description.render()
    }
}
