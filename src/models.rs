use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::ChatTurn;
use crate::schema::chat_history;

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = chat_history)]
#[diesel(primary_key(id))]
pub struct ChatHistoryRow {
    pub id: i64,
    pub session_id: Uuid,
    pub question: String,
    pub answer: String,
    pub source_filename: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = chat_history)]
pub struct NewChatHistoryRow<'a> {
    pub session_id: &'a Uuid,
    pub question: &'a str,
    pub answer: &'a str,
    pub source_filename: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

impl<'a> From<&'a ChatTurn> for NewChatHistoryRow<'a> {
    fn from(turn: &'a ChatTurn) -> Self {
        Self {
            session_id: &turn.session_id,
            question: &turn.question,
            answer: &turn.answer,
            source_filename: turn.source_filename.as_deref(),
            created_at: turn.created_at,
        }
    }
}

impl From<ChatHistoryRow> for ChatTurn {
    fn from(row: ChatHistoryRow) -> Self {
        ChatTurn {
            session_id: row.session_id,
            question: row.question,
            answer: row.answer,
            source_filename: row.source_filename,
            created_at: row.created_at,
        }
    }
}
