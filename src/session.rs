use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::{SchemaDescription, SchemaRegistry};
use crate::datafusion_engine::DataFusionEngine;
use crate::domain::{ChatTurn, QueryRow, Table};
use crate::error::AnalysisError;
use crate::history::ChatHistoryStore;
use crate::llm_client::LanguageModel;
use crate::narrator::ResultNarrator;
use crate::synthesizer::QuerySynthesizer;

/// One user's tables and schema. Holds a single table generation at a time.
pub struct ChatSession {
    id: Uuid,
    engine: DataFusionEngine,
    registry: SchemaRegistry,
    source_filename: Option<String>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            engine: DataFusionEngine::new(),
            registry: SchemaRegistry::new(),
            source_filename: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source_filename(&self) -> Option<&str> {
        self.source_filename.as_deref()
    }

    pub fn schema(&self) -> &SchemaDescription {
        self.registry.description()
    }

    pub fn table_names(&self) -> &[String] {
        self.engine.table_names()
    }

    /// Installs a fully loaded table generation, then its schema.
    pub fn replace_tables(
        &mut self,
        tables: &[Table],
        source_filename: Option<String>,
    ) -> Result<&SchemaDescription, AnalysisError> {
        if let Err(e) = self.engine.replace_generation(tables) {
            self.realign_schema();
            return Err(e);
        }

        self.source_filename = source_filename;
        let description = self.registry.register(tables);
        info!(
            "Session {} now holds {} tables",
            self.id,
            description.tables.len()
        );
        Ok(description)
    }

    /// After a failed swap the engine holds either the old generation or
    /// nothing; the schema must describe the same set.
    fn realign_schema(&mut self) {
        if self.engine.table_names().is_empty() && !self.registry.description().is_empty() {
            warn!("Session {} lost its tables, clearing the schema", self.id);
            self.registry.register(&[]);
            self.source_filename = None;
        }
    }

    pub async fn execute(&self, sql: &str) -> Result<Vec<QueryRow>, AnalysisError> {
        self.engine.execute_query(sql).await
    }

    pub async fn health_check(&self) -> Result<(), AnalysisError> {
        self.engine.health_check().await
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits an answer into word chunks for incremental display.
pub fn word_chunks(text: &str) -> Vec<String> {
    text.split_whitespace().map(|word| format!("{} ", word)).collect()
}

/// Synthesize, execute, narrate: strictly in that order, no retries.
pub struct SessionPipeline {
    synthesizer: QuerySynthesizer,
    narrator: ResultNarrator,
    history: Arc<dyn ChatHistoryStore>,
    chunk_delay: Duration,
}

impl SessionPipeline {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        history: Arc<dyn ChatHistoryStore>,
        max_result_rows: usize,
        chunk_delay: Duration,
    ) -> Self {
        Self {
            synthesizer: QuerySynthesizer::new(model.clone()),
            narrator: ResultNarrator::new(model, max_result_rows),
            history,
            chunk_delay,
        }
    }

    pub async fn run(&self, session: &ChatSession, question: &str) -> Result<String, AnalysisError> {
        // Read the schema fresh for every question.
        let schema = session.schema();
        let sql = self.synthesizer.synthesize(question, schema).await?;
        let rows = session.execute(&sql).await?;
        self.narrator.narrate(question, &rows).await
    }

    /// Runs one turn and records it on success. Errors become their user message.
    pub async fn respond(&self, session: &ChatSession, question: &str) -> Result<String, String> {
        match self.run(session, question).await {
            Ok(answer) => {
                let turn = ChatTurn::new(
                    session.id(),
                    question,
                    answer.clone(),
                    session.source_filename().map(str::to_string),
                );
                if let Err(e) = self.history.append(&turn).await {
                    warn!("Failed to record chat turn for session {}: {}", session.id(), e);
                }
                Ok(answer)
            }
            Err(e) => {
                error!("Question failed in session {}: {}", session.id(), e);
                Err(e.user_message())
            }
        }
    }

    /// Lazily answers a question as a stream of word chunks. A failure yields
    /// exactly one chunk carrying the error message.
    pub fn answer<'a>(
        &'a self,
        session: &'a ChatSession,
        question: &'a str,
    ) -> BoxStream<'a, String> {
        let delay = self.chunk_delay;
        stream::once(self.respond(session, question))
            .flat_map(|outcome| {
                let chunks = match outcome {
                    Ok(answer) => word_chunks(&answer),
                    Err(message) => vec![message],
                };
                stream::iter(chunks)
            })
            .then(move |chunk| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                chunk
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryChatHistory;
    use crate::llm_client::tests::ScriptedModel;
    use crate::loader::load_table;

    fn loaded_session() -> ChatSession {
        let mut session = ChatSession::new();
        let tables = vec![
            load_table("Table1", "sales.csv", b"date,name\n2024-01-01,X\n2024-01-02,Y\n").unwrap(),
            load_table("Table2", "inventory.csv", b"name,qty\nX,3\nX,4\n").unwrap(),
        ];
        session
            .replace_tables(&tables, Some("data.zip".to_string()))
            .unwrap();
        session
    }

    #[test]
    fn word_chunks_keep_words_in_order() {
        assert_eq!(word_chunks("There are  3\nentries"), vec!["There ", "are ", "3 ", "entries "]);
    }

    #[tokio::test]
    async fn streams_the_narrated_answer_and_records_the_turn() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok("SELECT COUNT(*) AS count FROM (SELECT name FROM Table1 UNION ALL SELECT name FROM Table2) AS combined WHERE name = 'X'".to_string()),
            Ok("There are 3 entries with name X.".to_string()),
        ]));
        let history = Arc::new(InMemoryChatHistory::new());
        let pipeline = SessionPipeline::new(model.clone(), history.clone(), 50, Duration::ZERO);
        let session = loaded_session();

        let chunks: Vec<String> = pipeline
            .answer(&session, "how many entries have name X")
            .collect()
            .await;

        assert_eq!(chunks.concat().trim(), "There are 3 entries with name X.");
        assert_eq!(chunks.len(), 7);

        {
            let prompts = model.prompts.lock().unwrap();
            assert!(prompts[1].user.contains(r#"[{"count":3}]"#));
        }

        let transcript = history.transcript(session.id()).await.unwrap();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].question, "how many entries have name X");
        assert_eq!(transcript[0].source_filename.as_deref(), Some("data.zip"));
    }

    #[tokio::test]
    async fn rate_limit_yields_one_chunk_and_records_nothing() {
        let model = Arc::new(ScriptedModel::new(vec![Err(
            AnalysisError::UpstreamRateLimited {
                message: "HTTP 429".to_string(),
            },
        )]));
        let history = Arc::new(InMemoryChatHistory::new());
        let pipeline = SessionPipeline::new(model, history.clone(), 50, Duration::ZERO);
        let session = loaded_session();

        let chunks: Vec<String> = pipeline.answer(&session, "anything").collect().await;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("try again"));
        assert!(history.is_empty().await);
        assert_eq!(session.table_names().len(), 2);
    }

    #[tokio::test]
    async fn bad_sql_is_reported_not_answered_as_empty() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(
            "SELECT missing FROM Table1".to_string(),
        )]));
        let history = Arc::new(InMemoryChatHistory::new());
        let pipeline = SessionPipeline::new(model.clone(), history.clone(), 50, Duration::ZERO);
        let session = loaded_session();

        let chunks: Vec<String> = pipeline.answer(&session, "anything").collect().await;

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("could not be executed"));
        // The narrator was never called.
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
        assert!(history.is_empty().await);
    }

    #[tokio::test]
    async fn nothing_runs_until_the_stream_is_polled() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let history = Arc::new(InMemoryChatHistory::new());
        let pipeline = SessionPipeline::new(model.clone(), history, 50, Duration::ZERO);
        let session = loaded_session();

        let stream = pipeline.answer(&session, "anything");
        assert!(model.prompts.lock().unwrap().is_empty());
        drop(stream);
    }

    #[test]
    fn schema_follows_the_engine_after_a_failed_swap() {
        let mut session = loaded_session();

        // Old generation still in place: schema is kept.
        session.realign_schema();
        assert_eq!(session.schema().tables.len(), 2);
        assert_eq!(session.source_filename(), Some("data.zip"));

        // Engine emptied: schema is cleared to match.
        session.engine.reset();
        session.realign_schema();
        assert!(session.table_names().is_empty());
        assert!(session.schema().tables.is_empty());
        assert_eq!(session.schema().render(), "[]");
        assert!(session.source_filename().is_none());
    }

    #[tokio::test]
    async fn replacing_tables_swaps_schema_and_storage() {
        let mut session = loaded_session();
        let next = load_table("Table1", "cities.csv", b"city\nParis\n").unwrap();

        let description = session.replace_tables(&[next], None).unwrap();
        assert_eq!(description.tables.len(), 1);
        assert!(!session.schema().render().contains("qty"));
        assert!(session.execute("SELECT qty FROM Table2").await.is_err());
        assert!(session.source_filename().is_none());
    }
}
