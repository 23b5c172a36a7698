use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::SchemaDescription;
use crate::error::AnalysisError;
use crate::integrity::asks_for_integrity_check;
use crate::llm_client::{LanguageModel, Prompt};

const SQL_RULES: &str = "\
You translate questions about uploaded CSV data into one SQL query.

Rules:
1. Reply with the SQL statement only. No explanations, no Markdown, no code fences, no comments.
2. Query the individual tables listed in the schema by their exact names. There is no table holding the whole database.
3. Use table and column names exactly as written in the schema; never invent columns.
4. When the column a question is about exists in more than one table, combine every table that has that column with UNION ALL. Never use plain UNION.
5. Do not stop at the first table that matches: include one UNION ALL branch for every table whose schema contains the column, and leave out tables that do not have it.
6. In every branch select only the column or columns the question needs. Never use SELECT *.
7. To count results, wrap the UNION ALL in a subquery and count outside it, e.g. SELECT COUNT(*) AS count FROM (... UNION ALL ...) AS combined. Never apply an aggregate to each branch separately.
8. Write one well-formed statement: single spaces between keywords, plain single quotes for strings, no backslashes or escape characters, no semicolons joining several statements.";

const INTEGRITY_RULES: &str = "\
This question asks whether the assignments are correct. Answer it with the three-part assignment audit and nothing else:
- Check 1 (cross-product co-assignment): every entity assigned the product is also assigned the related products it must be co-assigned with.
- Check 2 (security companion): every assignment that requires a security companion has one.
- Check 3 (managed file transfer companion): every assignment that requires a managed file transfer companion has one.
Return exactly three rows, one per check, each as
SELECT <n> AS check_order, CASE WHEN COUNT(*) = 0 THEN 'PASS' ELSE 'FAIL' END AS result FROM (<violations of check n>) AS violations
joined with UNION ALL and ordered by check_order. Never merge the three checks into a single pass/fail value.";

const NO_INTEGRITY_RULE: &str = "\
This question does not ask whether assignments are correct. Do not produce PASS/FAIL audit rows; answer the question directly.";

/// Produces a single SQL statement for a question from the live schema.
pub struct QuerySynthesizer {
    model: Arc<dyn LanguageModel>,
}

impl QuerySynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    pub fn build_prompt(question: &str, schema: &SchemaDescription) -> Prompt {
        let mut system = String::from(SQL_RULES);

        system.push_str("\n\nSchema (JSON list of tables with their columns and types):\n");
        system.push_str(&schema.render());

        if let Some(examples) = worked_examples(schema) {
            system.push_str("\n\nExamples for this schema:\n");
            system.push_str(&examples);
        }

        system.push_str("\n\n");
        if asks_for_integrity_check(question) {
            system.push_str(INTEGRITY_RULES);
        } else {
            system.push_str(NO_INTEGRITY_RULE);
        }

        Prompt::new(system, question.trim())
    }

    pub async fn synthesize(
        &self,
        question: &str,
        schema: &SchemaDescription,
    ) -> Result<String, AnalysisError> {
        let prompt = Self::build_prompt(question, schema);
        debug!(
            "Synthesizer prompt has {} schema tables",
            schema.tables.len()
        );

        let raw = self.model.generate(&prompt).await?;
        let sql = clean_sql(&raw);
        if sql.is_empty() {
            return Err(AnalysisError::UpstreamTransport {
                message: "Language model returned an empty SQL statement".to_string(),
            });
        }

        info!("Synthesized SQL via {}: {}", self.model.name(), sql);
        Ok(sql)
    }
}

/// Worked union and count examples drawn from the shared columns of the schema.
fn worked_examples(schema: &SchemaDescription) -> Option<String> {
    let column = schema.most_shared_column()?;
    let union = schema.union_projection(column)?;
    let count = schema.count_over_union(column, None)?;

    Some(format!(
        "Question: list every {column}\nSQL: {union}\n\nQuestion: how many {column} entries are there in total\nSQL: {count}"
    ))
}

/// Reduces a model reply to the bare statement.
pub fn clean_sql(raw: &str) -> String {
    let mut sql = raw.trim();

    if let Some(rest) = sql.strip_prefix("```") {
        let rest = rest
            .strip_prefix("sql")
            .or_else(|| rest.strip_prefix("SQL"))
            .unwrap_or(rest);
        sql = rest.strip_suffix("```").unwrap_or(rest).trim();
    }

    for label in ["SQLQuery:", "SQL:", "sql:"] {
        if let Some(rest) = sql.strip_prefix(label) {
            sql = rest.trim();
        }
    }

    sql.strip_suffix(';').unwrap_or(sql).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableSchema;
    use crate::domain::{ColumnKind, ColumnSpec};
    use crate::llm_client::tests::ScriptedModel;

    fn schema() -> SchemaDescription {
        let col = |name: &str, kind| ColumnSpec {
            name: name.to_string(),
            kind,
        };
        SchemaDescription {
            tables: vec![
                TableSchema {
                    table: "Table1".to_string(),
                    columns: vec![col("date", ColumnKind::Date), col("name", ColumnKind::String)],
                },
                TableSchema {
                    table: "Table2".to_string(),
                    columns: vec![col("name", ColumnKind::String), col("qty", ColumnKind::Int)],
                },
            ],
        }
    }

    #[test]
    fn prompt_embeds_rules_schema_and_examples() {
        let prompt = QuerySynthesizer::build_prompt("how many entries have name X", &schema());

        assert!(prompt.system.contains("UNION ALL"));
        assert!(prompt.system.contains("Never use SELECT *"));
        assert!(prompt.system.contains("\"table\": \"Table2\""));
        assert!(prompt
            .system
            .contains("SELECT name FROM Table1 UNION ALL SELECT name FROM Table2"));
        assert!(prompt.system.contains("SELECT COUNT(*) AS count FROM ("));
        assert_eq!(prompt.user, "how many entries have name X");
    }

    #[test]
    fn audit_rules_only_appear_for_correctness_questions() {
        let incidental = QuerySynthesizer::build_prompt("show me all entries with product X", &schema());
        assert!(!incidental.system.contains("check_order"));
        assert!(incidental.system.contains("Do not produce PASS/FAIL audit rows"));

        let audit = QuerySynthesizer::build_prompt("Are the product assignments correct?", &schema());
        assert!(audit.system.contains("Return exactly three rows"));
        assert!(audit.system.contains("managed file transfer"));
    }

    #[test]
    fn empty_schema_has_no_examples() {
        let prompt = QuerySynthesizer::build_prompt("anything", &SchemaDescription::default());
        assert!(prompt.system.contains("[]"));
        assert!(!prompt.system.contains("Examples for this schema"));
    }

    #[test]
    fn clean_sql_strips_fences_labels_and_semicolon() {
        assert_eq!(clean_sql("```sql\nSELECT name\nFROM Table1;\n```"), "SELECT name\nFROM Table1");
        assert_eq!(clean_sql("SQL: SELECT 1;"), "SELECT 1");
        assert_eq!(clean_sql("  SELECT qty FROM Table2 WHERE name = 'a  b' "), "SELECT qty FROM Table2 WHERE name = 'a  b'");
    }

    #[tokio::test]
    async fn rate_limit_propagates_unchanged() {
        let model = Arc::new(ScriptedModel::new(vec![Err(
            AnalysisError::UpstreamRateLimited {
                message: "HTTP 429".to_string(),
            },
        )]));
        let synthesizer = QuerySynthesizer::new(model);

        let err = synthesizer.synthesize("anything", &schema()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::UpstreamRateLimited { .. }));
    }

    #[tokio::test]
    async fn blank_reply_is_rejected() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("```sql\n```".to_string())]));
        let synthesizer = QuerySynthesizer::new(model);

        let err = synthesizer.synthesize("anything", &schema()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::UpstreamTransport { .. }));
    }
}
