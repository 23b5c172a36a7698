use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chat_query_engine::config::{EngineConfig, LlmConfig};
use chat_query_engine::history::{ChatHistoryStore, InMemoryChatHistory};
use chat_query_engine::llm_client::{LanguageModel, Prompt};
use chat_query_engine::{AnalysisError, ChatEngine};
use futures::StreamExt;

static INIT: Once = Once::new();

fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Replies with canned text in order and remembers every prompt.
struct CannedModel {
    replies: Mutex<VecDeque<Result<String, AnalysisError>>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl CannedModel {
    fn new(replies: Vec<Result<String, AnalysisError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for CannedModel {
    async fn generate(&self, prompt: &Prompt) -> Result<String, AnalysisError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(AnalysisError::UpstreamTransport {
                message: "no canned reply left".to_string(),
            })
        })
    }

    fn name(&self) -> &str {
        "canned"
    }
}

fn test_config() -> EngineConfig {
    EngineConfig {
        llm: LlmConfig {
            api_key: "test-key".to_string(),
            base_url: url::Url::parse("http://localhost:1/v1/").unwrap(),
            model: "test-model".to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(1),
        },
        grpc_port: 0,
        database_url: None,
        chunk_delay: Duration::ZERO,
        max_result_rows: 100,
        max_archive_bytes: 1024 * 1024,
    }
}

fn zip_of(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

async fn collect_answer(engine: &ChatEngine, session_id: uuid::Uuid, question: &str) -> Vec<String> {
    engine
        .ask(session_id, question.to_string())
        .await
        .expect("session should exist")
        .collect()
        .await
}

const SALES: &str = "date,name\n2024-01-01,X\n2024-01-02,Y\n";
const INVENTORY: &str = "name,qty\nX,3\nX,4\n";

#[tokio::test]
async fn test_question_is_answered_from_every_table_holding_the_column() {
    init_test_logging();

    // Given: an archive with sales and inventory tables sharing a name column
    let model = CannedModel::new(vec![
        Ok("```sql\nSELECT COUNT(*) AS count FROM (SELECT name FROM Table1 UNION ALL SELECT name FROM Table2) AS combined WHERE name = 'X';\n```".to_string()),
        Ok("There are 3 entries with name X.".to_string()),
    ]);
    let history = Arc::new(InMemoryChatHistory::new());
    let engine = ChatEngine::new(&test_config(), model.clone(), history.clone());

    let summary = engine
        .upload_archive(None, "shop.zip", &zip_of(&[("sales.csv", SALES), ("inventory.csv", INVENTORY)]))
        .await
        .expect("upload should succeed");
    assert_eq!(summary.tables.len(), 2);

    // When: asking how many entries carry the name X
    let chunks = collect_answer(&engine, summary.session_id, "how many entries have name X").await;

    // Then: the narrated answer arrives word by word
    assert_eq!(chunks.concat().trim(), "There are 3 entries with name X.");
    assert!(chunks.len() > 1);

    // And: the synthesizer saw both tables and the narrator saw the count
    let prompts = model.prompts();
    assert!(prompts[0].system.contains("\"table\": \"Table1\""));
    assert!(prompts[0].system.contains("\"table\": \"Table2\""));
    assert!(prompts[1].user.contains(r#"[{"count":3}]"#));

    // And: the turn is recorded under the session
    let transcript = engine.transcript(summary.session_id).await.unwrap();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].source_filename.as_deref(), Some("shop.zip"));
    assert_eq!(engine.list_sessions().await.unwrap(), vec![summary.session_id]);
}

#[tokio::test]
async fn test_rate_limit_is_one_chunk_and_nothing_is_recorded() {
    init_test_logging();

    // Given: a model that is rate limited
    let model = CannedModel::new(vec![Err(AnalysisError::UpstreamRateLimited {
        message: "HTTP 429 Too Many Requests".to_string(),
    })]);
    let history = Arc::new(InMemoryChatHistory::new());
    let engine = ChatEngine::new(&test_config(), model, history.clone());
    let summary = engine
        .upload_archive(None, "shop.zip", &zip_of(&[("sales.csv", SALES)]))
        .await
        .unwrap();

    // When
    let chunks = collect_answer(&engine, summary.session_id, "how many sales were there").await;

    // Then: a single retry-later message and no history entry
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].contains("try again"));
    assert!(history.is_empty().await);
    assert!(history.list_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_archive_replaces_every_table() {
    init_test_logging();

    // Given: a session loaded with three tables
    let model = CannedModel::new(vec![
        Ok("SELECT qty FROM Table2".to_string()),
        Ok("SELECT city FROM Table1".to_string()),
        Ok("Paris.".to_string()),
    ]);
    let engine = ChatEngine::new(&test_config(), model.clone(), Arc::new(InMemoryChatHistory::new()));
    let first = engine
        .upload_archive(
            None,
            "first.zip",
            &zip_of(&[("a.csv", SALES), ("b.csv", INVENTORY), ("c.csv", "v\n1\n")]),
        )
        .await
        .unwrap();

    // When: a one-file archive is uploaded into the same session
    let second = engine
        .upload_archive(Some(first.session_id), "second.zip", &zip_of(&[("cities.csv", "city\nParis\n")]))
        .await
        .unwrap();
    assert_eq!(second.session_id, first.session_id);
    assert_eq!(second.tables.len(), 1);

    // Then: the old tables can no longer be queried
    let chunks = collect_answer(&engine, first.session_id, "what quantities are there").await;
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].contains("could not be executed"));

    // And: the new schema is the only one offered to the model
    let chunks = collect_answer(&engine, first.session_id, "which city").await;
    assert_eq!(chunks.concat().trim(), "Paris.");
    let prompts = model.prompts();
    assert!(!prompts[1].system.contains("qty"));
    assert!(prompts[1].system.contains("city"));
}

#[tokio::test]
async fn test_tables_are_numbered_in_archive_order() {
    init_test_logging();

    // Given: five CSV files with arbitrary names plus non-CSV noise
    let engine = ChatEngine::new(&test_config(), CannedModel::new(vec![]), Arc::new(InMemoryChatHistory::new()));
    let archive = zip_of(&[
        ("zeta.csv", "a\n1\n"),
        ("README.md", "ignored"),
        ("alpha.csv", "b\n2\n"),
        ("nested/mid.CSV", "c\n3\n"),
        ("__MACOSX/._alpha.csv", "junk"),
        ("beta.csv", "d\n4\n"),
        ("omega.csv", "e\n5\n"),
    ]);

    // When
    let summary = engine.upload_archive(None, "many.zip", &archive).await.unwrap();

    // Then
    let names: Vec<_> = summary.tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Table1", "Table2", "Table3", "Table4", "Table5"]);
    let sources: Vec<_> = summary.tables.iter().map(|t| t.source_name.as_str()).collect();
    assert_eq!(sources, vec!["zeta.csv", "alpha.csv", "nested/mid.CSV", "beta.csv", "omega.csv"]);
}

#[tokio::test]
async fn test_malformed_dataset_does_not_block_its_siblings() {
    init_test_logging();

    // Given: an archive where the middle file has a ragged row
    let engine = ChatEngine::new(&test_config(), CannedModel::new(vec![]), Arc::new(InMemoryChatHistory::new()));
    let archive = zip_of(&[
        ("good.csv", "x,y\n1,2\n"),
        ("broken.csv", "x,y\n1,2,3\n"),
        ("also_good.csv", "z\nhello\n"),
    ]);

    // When
    let summary = engine.upload_archive(None, "mixed.zip", &archive).await.unwrap();

    // Then: the broken file is reported and the others are loaded
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].source_name, "broken.csv");
    let names: Vec<_> = summary.tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Table1", "Table3"]);
}
