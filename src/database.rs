use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager},
    AsyncPgConnection, RunQueryDsl,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;
use uuid::Uuid;

use crate::domain::ChatTurn;
use crate::error::AnalysisError;
use crate::history::ChatHistoryStore;
use crate::models::{ChatHistoryRow, NewChatHistoryRow};
use crate::schema::chat_history;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Chat history persisted in Postgres.
#[derive(Clone)]
pub struct PgChatHistory {
    pool: Pool<AsyncPgConnection>,
}

impl PgChatHistory {
    pub async fn new(database_url: &str) -> Result<Self, AnalysisError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(config)
            .build()
            .map_err(|e| AnalysisError::ConfigError {
                message: format!("Failed to create database pool: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations(database_url).await?;

        Ok(store)
    }

    pub async fn run_migrations(&self, database_url: &str) -> Result<(), AnalysisError> {
        // diesel_migrations only drives synchronous connections.
        let database_url = database_url.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), AnalysisError> {
            let mut connection = PgConnection::establish(&database_url).map_err(|e| {
                AnalysisError::Database {
                    message: format!("Failed to establish connection for migrations: {}", e),
                }
            })?;

            let applied = connection
                .run_pending_migrations(MIGRATIONS)
                .map_err(|e| AnalysisError::Database {
                    message: format!("Failed to run migrations: {}", e),
                })?;
            info!("Applied {} chat history migrations", applied.len());
            Ok(())
        })
        .await
        .map_err(|e| AnalysisError::InternalError {
            message: format!("Migration task failed: {}", e),
        })?
    }

    async fn connection(
        &self,
    ) -> Result<
        diesel_async::pooled_connection::deadpool::Object<AsyncPgConnection>,
        AnalysisError,
    > {
        self.pool.get().await.map_err(|e| AnalysisError::Database {
            message: format!("Failed to get database connection: {}", e),
        })
    }
}

#[async_trait]
impl ChatHistoryStore for PgChatHistory {
    async fn append(&self, turn: &ChatTurn) -> Result<(), AnalysisError> {
        let mut conn = self.connection().await?;

        diesel::insert_into(chat_history::table)
            .values(NewChatHistoryRow::from(turn))
            .execute(&mut conn)
            .await
            .map_err(|e| AnalysisError::Database {
                message: format!("Failed to insert chat turn: {}", e),
            })?;

        info!("Recorded chat turn for session {}", turn.session_id);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Uuid>, AnalysisError> {
        let mut conn = self.connection().await?;

        chat_history::table
            .group_by(chat_history::session_id)
            .select(chat_history::session_id)
            .order_by(diesel::dsl::max(chat_history::id).desc())
            .load::<Uuid>(&mut conn)
            .await
            .map_err(|e| AnalysisError::Database {
                message: format!("Failed to list chat sessions: {}", e),
            })
    }

    async fn transcript(&self, session_id: Uuid) -> Result<Vec<ChatTurn>, AnalysisError> {
        let mut conn = self.connection().await?;

        let rows = chat_history::table
            .filter(chat_history::session_id.eq(session_id))
            .order(chat_history::id.asc())
            .select(ChatHistoryRow::as_select())
            .load::<ChatHistoryRow>(&mut conn)
            .await
            .map_err(|e| AnalysisError::Database {
                message: format!("Failed to load transcript: {}", e),
            })?;

        Ok(rows.into_iter().map(ChatTurn::from).collect())
    }
}
