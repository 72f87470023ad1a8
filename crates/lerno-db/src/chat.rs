//! AI conversation message persistence.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use lerno_core::{ChatMessage, ChatRepository, Error, Result};

/// PostgreSQL implementation of [`ChatRepository`].
#[derive(Clone)]
pub struct PgChatRepository {
    pool: PgPool,
}

impl PgChatRepository {
    /// Create a new repository over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatRepository for PgChatRepository {
    async fn save_messages(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        messages: &[ChatMessage],
    ) -> Result<u64> {
        if messages.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut inserted = 0;

        // Producer-assigned ids make redelivered batches no-ops.
        for message in messages {
            let result = sqlx::query(
                "INSERT INTO chat_messages (id, tenant_id, conversation_id, role, content)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(message.id)
            .bind(tenant_id)
            .bind(conversation_id)
            .bind(&message.role)
            .bind(&message.content)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(inserted)
    }
}
