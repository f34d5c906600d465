use task_core::{Conversation, ConversationId, Message, MessageId, MessageRole, NewMessage};

use super::Store;
use crate::error::StoreError;

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    conversation_id: i64,
    role: MessageRole,
    content: String,
    tool_call_id: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: MessageId(row.id),
            conversation_id: ConversationId(row.conversation_id),
            role: row.role,
            content: row.content,
            created_at: row.created_at,
            tool_call_id: row.tool_call_id,
        }
    }
}

impl Store {
    pub async fn create_conversation(&self) -> Result<ConversationId, StoreError> {
        let id: i64 = sqlx::query_scalar("INSERT INTO conversations DEFAULT VALUES RETURNING id")
            .fetch_one(&self.pool)
            .await?;

        Ok(ConversationId(id))
    }

    pub async fn insert_message(&self, message: &NewMessage) -> Result<MessageId, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO messages (conversation_id, role, content, tool_call_id)
             VALUES ($1, $2, $3, $4)
             RETURNING id",
        )
        .bind(message.conversation_id.0)
        .bind(message.role)
        .bind(&message.content)
        .bind(&message.tool_call_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(MessageId(id))
    }

    pub async fn list_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, conversation_id, role, content, tool_call_id, created_at
               FROM messages
              WHERE conversation_id = $1
              ORDER BY id ASC",
        )
        .bind(conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    pub async fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError> {
        let created_at: Option<chrono::DateTime<chrono::Utc>> =
            sqlx::query_scalar("SELECT created_at FROM conversations WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;

        Ok(created_at.map(|created_at| Conversation { id, created_at }))
    }
}
