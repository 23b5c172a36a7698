use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::ChatTurn;
use crate::error::AnalysisError;

/// Append-only record of answered questions, keyed by session.
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    async fn append(&self, turn: &ChatTurn) -> Result<(), AnalysisError>;

    /// Distinct session ids, most recently active first.
    async fn list_sessions(&self) -> Result<Vec<Uuid>, AnalysisError>;

    /// Turns of one session in the order they were recorded.
    async fn transcript(&self, session_id: Uuid) -> Result<Vec<ChatTurn>, AnalysisError>;
}

#[derive(Debug, Default)]
pub struct InMemoryChatHistory {
    turns: RwLock<Vec<ChatTurn>>,
}

impl InMemoryChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.turns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.turns.read().await.is_empty()
    }
}

#[async_trait]
impl ChatHistoryStore for InMemoryChatHistory {
    async fn append(&self, turn: &ChatTurn) -> Result<(), AnalysisError> {
        self.turns.write().await.push(turn.clone());
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Uuid>, AnalysisError> {
        let turns = self.turns.read().await;
        let mut sessions: Vec<Uuid> = Vec::new();
        for turn in turns.iter().rev() {
            if !sessions.contains(&turn.session_id) {
                sessions.push(turn.session_id);
            }
        }
        Ok(sessions)
    }

    async fn transcript(&self, session_id: Uuid) -> Result<Vec<ChatTurn>, AnalysisError> {
        Ok(self
            .turns
            .read()
            .await
            .iter()
            .filter(|turn| turn.session_id == session_id)
            .cloned()
            .collect())
    }
}
