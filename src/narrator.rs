use std::sync::Arc;

use tracing::info;

use crate::domain::QueryRow;
use crate::error::AnalysisError;
use crate::integrity::{asks_for_integrity_check, IntegrityReport};
use crate::llm_client::{LanguageModel, Prompt};

const NARRATOR_RULES: &str = "\
You answer a user's question about their data using the result of a SQL query that was run for it.
Reply with the final answer only, in plain sentences. Do not describe the query, the JSON, or how you formatted the answer.
If the result holds a single count or total, state that number as the answer.
If the result is empty, say that no matching data was found.";

const INTEGRITY_NARRATION: &str = "\
The result is the three-part assignment audit. Explain each of the three findings below in plain language, \
saying which relationship is or is not satisfied. Do not echo PASS/FAIL tokens or raw counts.";

/// Turns raw query rows into a plain-language answer.
pub struct ResultNarrator {
    model: Arc<dyn LanguageModel>,
    max_rows: usize,
}

impl ResultNarrator {
    pub fn new(model: Arc<dyn LanguageModel>, max_rows: usize) -> Self {
        Self { model, max_rows }
    }

    /// Serializes rows for the prompt, noting truncation.
    pub fn serialize_rows(rows: &[QueryRow], max_rows: usize) -> Result<String, AnalysisError> {
        let shown = &rows[..rows.len().min(max_rows)];
        let mut text = serde_json::to_string(shown)?;
        if rows.len() > shown.len() {
            text.push_str(&format!(
                "\n(showing the first {} of {} rows)",
                shown.len(),
                rows.len()
            ));
        }
        Ok(text)
    }

    pub fn build_prompt(question: &str, raw_result: &str, report: Option<&IntegrityReport>) -> Prompt {
        let mut system = String::from(NARRATOR_RULES);

        if let Some(report) = report {
            system.push_str("\n\n");
            system.push_str(INTEGRITY_NARRATION);
            for (position, statement) in report.statements().iter().enumerate() {
                system.push_str(&format!("\n{}. {}", position + 1, statement));
            }
        }

        let user = format!("Question: {}\n\nQuery result:\n{}", question.trim(), raw_result);
        Prompt::new(system, user)
    }

    pub async fn narrate(&self, question: &str, rows: &[QueryRow]) -> Result<String, AnalysisError> {
        // Row shape alone is not enough: ordinary pass/fail data looks the same.
        let report = if asks_for_integrity_check(question) {
            IntegrityReport::from_rows(rows)
        } else {
            None
        };
        let raw_result = Self::serialize_rows(rows, self.max_rows)?;
        let prompt = Self::build_prompt(question, &raw_result, report.as_ref());

        let answer = self.model.generate(&prompt).await?;
        let answer = answer.trim().to_string();
        if answer.is_empty() {
            return Err(AnalysisError::UpstreamTransport {
                message: "Language model returned an empty answer".to_string(),
            });
        }

        info!(
            "Narrated {} rows into {} characters",
            rows.len(),
            answer.len()
        );
        Ok(answer)
    }
}
