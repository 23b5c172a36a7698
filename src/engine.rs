use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::archive::extract_csv_entries;
use crate::config::EngineConfig;
use crate::domain::{ChatTurn, DatasetFailure, Table};
use crate::error::AnalysisError;
use crate::history::ChatHistoryStore;
use crate::llm_client::LanguageModel;
use crate::loader::load_tables;
use crate::session::{ChatSession, SessionPipeline};

const ANSWER_CHANNEL_CAPACITY: usize = 32;

/// What an archive upload left in the session.
#[derive(Debug)]
pub struct UploadSummary {
    pub session_id: Uuid,
    pub tables: Vec<Table>,
    pub failures: Vec<DatasetFailure>,
}

pub struct ChatEngine {
    pipeline: Arc<SessionPipeline>,
    history: Arc<dyn ChatHistoryStore>,
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<ChatSession>>>>,
    max_archive_bytes: u64,
}

impl ChatEngine {
    pub fn new(
        config: &EngineConfig,
        model: Arc<dyn LanguageModel>,
        history: Arc<dyn ChatHistoryStore>,
    ) -> Self {
        info!("Initializing chat engine with model {}", model.name());

        let pipeline = SessionPipeline::new(
            model,
            history.clone(),
            config.max_result_rows,
            config.chunk_delay,
        );

        Self {
            pipeline: Arc::new(pipeline),
            history,
            sessions: RwLock::new(HashMap::new()),
            max_archive_bytes: config.max_archive_bytes,
        }
    }

    pub async fn create_session(&self) -> Uuid {
        let session = ChatSession::new();
        let id = session.id();
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(session)));
        info!("Created session {}", id);
        id
    }

    /// Drops the session and its tables. Its recorded history stays.
    pub async fn close_session(&self, session_id: Uuid) -> Result<(), AnalysisError> {
        match self.sessions.write().await.remove(&session_id) {
            Some(_) => {
                info!("Closed session {}", session_id);
                Ok(())
            }
            None => Err(AnalysisError::SessionNotFound {
                session_id: session_id.to_string(),
            }),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn session(&self, session_id: Uuid) -> Result<Arc<Mutex<ChatSession>>, AnalysisError> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| AnalysisError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Loads every CSV of the archive and replaces the session's tables with
    /// them. A missing session id starts a new session.
    pub async fn upload_archive(
        &self,
        session_id: Option<Uuid>,
        filename: &str,
        archive: &[u8],
    ) -> Result<UploadSummary, AnalysisError> {
        // An unreadable archive leaves the current generation untouched.
        let entries = extract_csv_entries(archive, self.max_archive_bytes)?;
        let report = load_tables(&entries);

        let session_id = match session_id {
            Some(id) => id,
            None => self.create_session().await,
        };
        let session = self.session(session_id).await?;

        let mut session = session.lock().await;
        session.replace_tables(&report.tables, Some(filename.to_string()))?;

        for failure in &report.failures {
            warn!(
                "Session {}: dataset '{}' was not loaded: {}",
                session_id, failure.source_name, failure.message
            );
        }
        info!(
            "Session {}: loaded {} of {} datasets from '{}'",
            session_id,
            report.tables.len(),
            entries.len(),
            filename
        );

        Ok(UploadSummary {
            session_id,
            tables: report.tables,
            failures: report.failures,
        })
    }

    /// Streams the answer to a question. Pipeline failures arrive as a single
    /// chunk on the stream; only an unknown session is an error here.
    pub async fn ask(
        &self,
        session_id: Uuid,
        question: String,
    ) -> Result<ReceiverStream<String>, AnalysisError> {
        let session = self.session(session_id).await?;
        let pipeline = self.pipeline.clone();
        let (tx, rx) = mpsc::channel(ANSWER_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            // Held for the whole answer so an upload cannot swap tables mid-question.
            let session = session.lock().await;
            let mut chunks = pipeline.answer(&session, &question);
            while let Some(chunk) = chunks.next().await {
                if tx.send(chunk).await.is_err() {
                    info!("Client stopped reading answer for session {}", session_id);
                    return;
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    pub async fn list_sessions(&self) -> Result<Vec<Uuid>, AnalysisError> {
        self.history.list_sessions().await
    }

    pub async fn transcript(&self, session_id: Uuid) -> Result<Vec<ChatTurn>, AnalysisError> {
        self.history.transcript(session_id).await
    }

    pub async fn health_check(&self) -> Result<(), AnalysisError> {
        ChatSession::new().health_check().await
    }
}
