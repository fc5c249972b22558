// ABOUTME: Database operations for chat conversations and their ordered messages
// ABOUTME: Pool-level reads plus the per-turn staged ChatSession used by the orchestrator
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::now_timestamp;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::llm::{ChatMessage, MessageRole};

// ============================================================================
// Domain Enums
// ============================================================================

/// Lifecycle state of a message row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Assistant placeholder waiting for model output
    Generating,
    /// Final content stored
    Completed,
    /// Turn failed or was cancelled; content holds whatever arrived
    Aborted,
}

impl MessageStatus {
    /// Stored representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generating" => Ok(Self::Generating),
            "completed" => Ok(Self::Completed),
            "aborted" => Ok(Self::Aborted),
            other => Err(AppError::database(format!("Unknown message status: {other}"))),
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client surface that created a conversation; fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationSource {
    /// The general chat page
    GeneralChat,
}

impl ConversationSource {
    /// Stored representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GeneralChat => "general_chat",
        }
    }
}

impl FromStr for ConversationSource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general_chat" => Ok(Self::GeneralChat),
            other => Err(AppError::invalid_input(format!(
                "Unknown conversation source: {other}"
            ))),
        }
    }
}

// ============================================================================
// Database Record Types
// ============================================================================

/// Database representation of a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Unique conversation ID
    pub id: String,
    /// User ID who owns the conversation
    pub user_id: String,
    /// Surface that created the conversation
    pub source: ConversationSource,
    /// Title; `None` until one is derived or generated
    pub title: Option<String>,
    /// Model used by the most recent turn
    pub last_model: String,
    /// When the most recent turn ran (RFC 3339)
    pub last_chat_time: String,
    /// When the conversation was created (RFC 3339)
    pub created_at: String,
    /// When the conversation was last updated (RFC 3339)
    pub updated_at: String,
}

/// Database representation of a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique message ID
    pub id: String,
    /// Conversation ID this message belongs to
    pub conversation_id: String,
    /// Owning user
    pub user_id: String,
    /// Position in the conversation, starting at 1
    pub order: i64,
    /// Role of the message sender
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// Model that produced an assistant message
    pub model: Option<String>,
    /// Lifecycle state
    pub status: MessageStatus,
    /// Reasoning text, if the model produced any
    pub thinking: Option<String>,
    /// When the message was created (RFC 3339)
    pub created_at: String,
    /// When the message was last updated (RFC 3339)
    pub updated_at: String,
}

/// Fields for a message insert
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    /// Conversation the message belongs to
    pub conversation_id: &'a str,
    /// Owning user
    pub user_id: &'a str,
    /// Position in the conversation
    pub order: i64,
    /// Sender role
    pub role: MessageRole,
    /// Initial content
    pub content: &'a str,
    /// Model for assistant messages
    pub model: Option<&'a str>,
    /// Initial status
    pub status: MessageStatus,
}

const CONVERSATION_COLUMNS: &str =
    "id, user_id, source, title, last_model, last_chat_time, created_at, updated_at";

const MESSAGE_COLUMNS: &str = r#"id, conversation_id, user_id, "order", role, content, model, status, thinking, created_at, updated_at"#;

fn conversation_from_row(r: &SqliteRow) -> AppResult<ConversationRecord> {
    let source: String = r.try_get("source")?;
    Ok(ConversationRecord {
        id: r.try_get("id")?,
        user_id: r.try_get("user_id")?,
        source: source.parse()?,
        title: r.try_get("title")?,
        last_model: r.try_get("last_model")?,
        last_chat_time: r.try_get("last_chat_time")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn message_from_row(r: &SqliteRow) -> AppResult<MessageRecord> {
    let role: String = r.try_get("role")?;
    let status: String = r.try_get("status")?;
    Ok(MessageRecord {
        id: r.try_get("id")?,
        conversation_id: r.try_get("conversation_id")?,
        user_id: r.try_get("user_id")?,
        order: r.try_get("order")?,
        role: role.parse()?,
        content: r.try_get("content")?,
        model: r.try_get("model")?,
        status: status.parse()?,
        thinking: r.try_get("thinking")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

// ============================================================================
// Chat Manager
// ============================================================================

/// Pool-level conversation operations used outside of a chat turn
#[derive(Clone)]
pub struct ChatManager {
    pool: SqlitePool,
}

impl ChatManager {
    /// Create a new chat manager
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a conversation by ID
    ///
    /// # Errors
    ///
    /// Returns an error if database operation fails
    pub async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> AppResult<Option<ConversationRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get conversation: {e}")))?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    /// All messages of a conversation in turn order
    ///
    /// # Errors
    ///
    /// Returns an error if database operation fails
    pub async fn list_messages(&self, conversation_id: &str) -> AppResult<Vec<MessageRecord>> {
        let rows = sqlx::query(&format!(
            r#"SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 ORDER BY "order" ASC"#
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list messages: {e}")))?;

        rows.iter().map(message_from_row).collect()
    }

    /// Delete a conversation owned by `user_id`; its messages cascade
    ///
    /// Returns `false` when nothing matched.
    ///
    /// # Errors
    ///
    /// Returns an error if database operation fails
    pub async fn delete_conversation(&self, conversation_id: &str, user_id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1 AND user_id = $2")
            .bind(conversation_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete conversation: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Chat Session
// ============================================================================

/// A write staged by a session against a row that is already stored
#[derive(Debug, Clone)]
enum StagedUpdate {
    Message {
        id: String,
        content: String,
        thinking: Option<String>,
        status: MessageStatus,
        updated_at: String,
    },
    Touch {
        conversation_id: String,
        last_model: String,
        last_chat_time: String,
    },
    Title {
        conversation_id: String,
        title: String,
        updated_at: String,
    },
}

impl StagedUpdate {
    fn apply_to_conversation(&self, conversation: &mut ConversationRecord) {
        match self {
            Self::Touch {
                conversation_id,
                last_model,
                last_chat_time,
            } if *conversation_id == conversation.id => {
                last_model.clone_into(&mut conversation.last_model);
                last_chat_time.clone_into(&mut conversation.last_chat_time);
                last_chat_time.clone_into(&mut conversation.updated_at);
            }
            Self::Title {
                conversation_id,
                title,
                updated_at,
            } if *conversation_id == conversation.id => {
                conversation.title = Some(title.clone());
                updated_at.clone_into(&mut conversation.updated_at);
            }
            _ => {}
        }
    }

    fn apply_to_message(&self, message: &mut MessageRecord) {
        if let Self::Message {
            id,
            content,
            thinking,
            status,
            updated_at,
        } = self
        {
            if *id == message.id {
                content.clone_into(&mut message.content);
                message.thinking.clone_from(thinking);
                message.status = *status;
                updated_at.clone_into(&mut message.updated_at);
            }
        }
    }
}

/// The writes of one chat turn, held in memory until [`ChatSession::commit`]
///
/// Reads go to the pool and see staged rows layered on top. No connection or
/// write lock is held while the turn streams; `commit` applies everything in
/// one short transaction. Dropping an uncommitted session discards it.
pub struct ChatSession {
    pool: SqlitePool,
    conversation: Option<ConversationRecord>,
    messages: Vec<MessageRecord>,
    updates: Vec<StagedUpdate>,
    open: bool,
}

impl ChatSession {
    pub(super) const fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            conversation: None,
            messages: Vec::new(),
            updates: Vec::new(),
            open: true,
        }
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(AppError::internal("Chat session already committed"))
        }
    }

    fn staged_conversation(&mut self, conversation_id: &str) -> Option<&mut ConversationRecord> {
        self.conversation
            .as_mut()
            .filter(|c| c.id == conversation_id)
    }

    async fn stored_order_exists(&self, conversation_id: &str, order: i64) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM messages WHERE conversation_id = $1 AND "order" = $2"#,
        )
        .bind(conversation_id)
        .bind(order)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to check message order: {e}")))?;
        Ok(count > 0)
    }

    /// Whether the session still has work to commit or discard
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// Stage a new conversation
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or already staged a conversation
    pub fn insert_conversation(
        &mut self,
        user_id: &str,
        source: ConversationSource,
        title: Option<&str>,
        last_model: &str,
    ) -> AppResult<ConversationRecord> {
        self.ensure_open()?;
        if self.conversation.is_some() {
            return Err(AppError::internal(
                "Chat session already staged a conversation",
            ));
        }

        let now = now_timestamp();
        let record = ConversationRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_owned(),
            source,
            title: title.map(ToOwned::to_owned),
            last_model: last_model.to_owned(),
            last_chat_time: now.clone(),
            created_at: now.clone(),
            updated_at: now,
        };
        self.conversation = Some(record.clone());
        Ok(record)
    }

    /// Load a conversation as this session sees it
    ///
    /// # Errors
    ///
    /// Returns an error if database operation fails
    pub async fn load_conversation(
        &mut self,
        conversation_id: &str,
    ) -> AppResult<Option<ConversationRecord>> {
        self.ensure_open()?;
        if let Some(staged) = self.staged_conversation(conversation_id) {
            return Ok(Some(staged.clone()));
        }

        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to load conversation: {e}")))?;

        let mut conversation = row.as_ref().map(conversation_from_row).transpose()?;
        if let Some(conversation) = conversation.as_mut() {
            for update in &self.updates {
                update.apply_to_conversation(conversation);
            }
        }
        Ok(conversation)
    }

    /// `max(order) + 1` within the conversation, or 1 when it has no messages
    ///
    /// # Errors
    ///
    /// Returns an error if database operation fails
    pub async fn next_message_order(&mut self, conversation_id: &str) -> AppResult<i64> {
        self.ensure_open()?;
        let stored: Option<i64> = sqlx::query_scalar(
            r#"SELECT MAX("order") FROM messages WHERE conversation_id = $1"#,
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to compute message order: {e}")))?;

        let staged = self
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.order)
            .max();

        Ok(stored.max(staged).unwrap_or(0) + 1)
    }

    /// Stage a message row
    ///
    /// # Errors
    ///
    /// Returns an error if the `(conversation_id, order)` pair is already
    /// taken, staged or stored, or if database operation fails
    pub async fn insert_message(&mut self, message: NewMessage<'_>) -> AppResult<MessageRecord> {
        self.ensure_open()?;
        let staged_duplicate = self
            .messages
            .iter()
            .any(|m| m.conversation_id == message.conversation_id && m.order == message.order);

        if staged_duplicate
            || self
                .stored_order_exists(message.conversation_id, message.order)
                .await?
        {
            return Err(AppError::new(
                ErrorCode::ResourceAlreadyExists,
                format!(
                    "Failed to insert message: order {} already used in conversation {}",
                    message.order, message.conversation_id
                ),
            ));
        }

        let now = now_timestamp();
        let record = MessageRecord {
            id: Uuid::new_v4().to_string(),
            conversation_id: message.conversation_id.to_owned(),
            user_id: message.user_id.to_owned(),
            order: message.order,
            role: message.role,
            content: message.content.to_owned(),
            model: message.model.map(ToOwned::to_owned),
            status: message.status,
            thinking: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.messages.push(record.clone());
        Ok(record)
    }

    /// Set the final content, thinking, and status of a message
    ///
    /// # Errors
    ///
    /// Returns an error if database operation fails or the message is missing
    pub async fn finalize_message(
        &mut self,
        message_id: &str,
        content: &str,
        thinking: Option<&str>,
        status: MessageStatus,
    ) -> AppResult<()> {
        self.ensure_open()?;
        let update = StagedUpdate::Message {
            id: message_id.to_owned(),
            content: content.to_owned(),
            thinking: thinking.map(ToOwned::to_owned),
            status,
            updated_at: now_timestamp(),
        };

        if let Some(staged) = self.messages.iter_mut().find(|m| m.id == message_id) {
            update.apply_to_message(staged);
            return Ok(());
        }

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE id = $1")
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to finalize message: {e}")))?;
        if stored == 0 {
            return Err(AppError::not_found(format!("Message {message_id}")));
        }
        self.updates.push(update);
        Ok(())
    }

    /// Completed messages of the conversation in turn order, as model context
    ///
    /// # Errors
    ///
    /// Returns an error if database operation fails
    pub async fn completed_context(&mut self, conversation_id: &str) -> AppResult<Vec<ChatMessage>> {
        self.ensure_open()?;
        let rows = sqlx::query(&format!(
            r#"SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 ORDER BY "order" ASC"#
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to load message context: {e}")))?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        for message in &mut messages {
            for update in &self.updates {
                update.apply_to_message(message);
            }
        }
        messages.extend(
            self.messages
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned(),
        );
        messages.sort_by_key(|m| m.order);

        Ok(messages
            .into_iter()
            .filter(|m| m.status == MessageStatus::Completed)
            .map(|m| ChatMessage::new(m.role, m.content))
            .collect())
    }

    /// Record the model and time of the latest turn
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed
    pub fn touch_conversation(
        &mut self,
        conversation_id: &str,
        last_model: &str,
        last_chat_time: &str,
    ) -> AppResult<()> {
        self.ensure_open()?;
        let update = StagedUpdate::Touch {
            conversation_id: conversation_id.to_owned(),
            last_model: last_model.to_owned(),
            last_chat_time: last_chat_time.to_owned(),
        };
        match self.staged_conversation(conversation_id) {
            Some(staged) => update.apply_to_conversation(staged),
            None => self.updates.push(update),
        }
        Ok(())
    }

    /// Replace the conversation title
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed
    pub fn set_title(&mut self, conversation_id: &str, title: &str) -> AppResult<()> {
        self.ensure_open()?;
        let update = StagedUpdate::Title {
            conversation_id: conversation_id.to_owned(),
            title: title.to_owned(),
            updated_at: now_timestamp(),
        };
        match self.staged_conversation(conversation_id) {
            Some(staged) => update.apply_to_conversation(staged),
            None => self.updates.push(update),
        }
        Ok(())
    }

    /// Write every staged change in one short transaction
    ///
    /// On failure nothing is written and the staged state is kept, so the
    /// caller may adjust it and commit again.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the session was already committed
    pub async fn commit(&mut self) -> AppResult<()> {
        self.ensure_open()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;

        if let Some(c) = &self.conversation {
            sqlx::query(
                r"
                INSERT INTO conversations (id, user_id, source, title, last_model, last_chat_time, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(&c.id)
            .bind(&c.user_id)
            .bind(c.source.as_str())
            .bind(&c.title)
            .bind(&c.last_model)
            .bind(&c.last_chat_time)
            .bind(&c.created_at)
            .bind(&c.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to create conversation: {e}")))?;
        }

        for m in &self.messages {
            sqlx::query(
                r#"
                INSERT INTO messages (id, conversation_id, user_id, "order", role, content, model, status, thinking, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(&m.id)
            .bind(&m.conversation_id)
            .bind(&m.user_id)
            .bind(m.order)
            .bind(m.role.as_str())
            .bind(&m.content)
            .bind(&m.model)
            .bind(m.status.as_str())
            .bind(&m.thinking)
            .bind(&m.created_at)
            .bind(&m.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // Keep the unique-violation code so order races are recognisable
                let mut error = AppError::from(e);
                error.message = format!("Failed to insert message: {}", error.message);
                error
            })?;
        }

        for update in &self.updates {
            let query = match update {
                StagedUpdate::Message {
                    id,
                    content,
                    thinking,
                    status,
                    updated_at,
                } => sqlx::query(
                    "UPDATE messages SET content = $1, thinking = $2, status = $3, updated_at = $4 WHERE id = $5",
                )
                .bind(content)
                .bind(thinking)
                .bind(status.as_str())
                .bind(updated_at)
                .bind(id),
                StagedUpdate::Touch {
                    conversation_id,
                    last_model,
                    last_chat_time,
                } => sqlx::query(
                    "UPDATE conversations SET last_model = $1, last_chat_time = $2, updated_at = $2 WHERE id = $3",
                )
                .bind(last_model)
                .bind(last_chat_time)
                .bind(conversation_id),
                StagedUpdate::Title {
                    conversation_id,
                    title,
                    updated_at,
                } => sqlx::query("UPDATE conversations SET title = $1, updated_at = $2 WHERE id = $3")
                    .bind(title)
                    .bind(updated_at)
                    .bind(conversation_id),
            };
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::database(format!("Failed to apply chat update: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit chat turn: {e}")))?;

        self.discard();
        Ok(())
    }

    /// Discard every staged change
    pub fn rollback(&mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        self.conversation = None;
        self.messages.clear();
        self.updates.clear();
        self.open = false;
    }
}
