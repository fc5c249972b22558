// ABOUTME: SQLite store for the model catalog, conversations, and messages
// ABOUTME: Owns the connection pool, code-driven migrations, and per-turn chat sessions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Database Management
//!
//! A single `SQLite` pool backs three managers:
//!
//! - [`CatalogManager`]: providers, models, and the links between them
//! - [`ChatManager`]: pool-level conversation reads and deletes
//! - [`ChatSession`]: the staged writes of one chat turn, flushed in a short transaction
//!
//! Migrations are plain `CREATE TABLE IF NOT EXISTS` statements executed at
//! startup.

mod catalog;
mod chat;

pub use catalog::{
    AvailableModel, CatalogManager, LinkRecord, ManufacturerModels, ModelRecord, NewModel,
    NewProvider, ProviderRecord,
};
pub use chat::{
    ChatManager, ChatSession, ConversationRecord, ConversationSource, MessageRecord,
    MessageStatus, NewMessage,
};

use std::str::FromStr;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, AppResult};

/// Current UTC time as fixed-width RFC 3339 text, so string order is time order
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Database manager for the chat store
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the pool described by `config` and run migrations
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated
    pub async fn new(config: &DatabaseConfig) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url.to_connection_string())
            .map_err(|e| AppError::config_invalid(format!("Invalid DATABASE_URL: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        let (options, pool_options) = if config.url.is_memory() {
            // Every in-memory connection is its own database: keep exactly one alive
            (
                options,
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None),
            )
        } else {
            (
                options.journal_mode(SqliteJournalMode::Wal),
                SqlitePoolOptions::new().max_connections(config.max_connections),
            )
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| AppError::database(format!("Failed to open database: {e}")))?;

        let db = Self { pool };
        db.migrate().await?;

        info!(
            database = %config.url,
            max_connections = config.max_connections,
            "Database ready"
        );
        Ok(db)
    }

    /// Fresh, migrated in-memory database
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail
    pub async fn in_memory() -> AppResult<Self> {
        Self::new(&DatabaseConfig::in_memory()).await
    }

    /// Get a reference to the database pool for advanced operations
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Catalog operations (providers, models, links)
    #[must_use]
    pub fn catalog(&self) -> CatalogManager {
        CatalogManager::new(self.pool.clone())
    }

    /// Pool-level conversation reads and deletes
    #[must_use]
    pub fn chat(&self) -> ChatManager {
        ChatManager::new(self.pool.clone())
    }

    /// Start staging the writes of one chat turn
    #[must_use]
    pub fn begin_session(&self) -> ChatSession {
        ChatSession::new(self.pool.clone())
    }

    /// Run database migrations
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        self.migrate_catalog().await?;
        self.migrate_chat().await?;
        Ok(())
    }

    async fn migrate_catalog(&self) -> AppResult<()> {
        let statements = [
            r"
            CREATE TABLE IF NOT EXISTS providers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                api_key TEXT NOT NULL,
                base_url_map TEXT NOT NULL DEFAULT '{}',
                is_enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS models (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                manufacturer TEXT NOT NULL,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS model_provider_links (
                id TEXT PRIMARY KEY,
                model_id TEXT NOT NULL REFERENCES models(id) ON DELETE CASCADE,
                provider_id TEXT NOT NULL REFERENCES providers(id) ON DELETE CASCADE,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (model_id, provider_id)
            )
            ",
            "CREATE INDEX IF NOT EXISTS idx_links_model ON model_provider_links(model_id)",
        ];
        self.execute_all(&statements, "catalog").await
    }

    async fn migrate_chat(&self) -> AppResult<()> {
        let statements = [
            r"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                source TEXT NOT NULL,
                title TEXT,
                last_model TEXT NOT NULL,
                last_chat_time TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
            "CREATE INDEX IF NOT EXISTS idx_conversations_user_last_chat ON conversations(user_id, last_chat_time)",
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                "order" INTEGER NOT NULL CHECK ("order" > 0),
                role TEXT NOT NULL CHECK (role IN ('system', 'user', 'assistant')),
                content TEXT NOT NULL DEFAULT '',
                model TEXT,
                status TEXT NOT NULL CHECK (status IN ('generating', 'completed', 'aborted')),
                thinking TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (conversation_id, "order")
            )
            "#,
        ];
        self.execute_all(&statements, "chat").await
    }

    async fn execute_all(&self, statements: &[&str], group: &str) -> AppResult<()> {
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::database(format!("Failed to migrate {group} tables: {e}")))?;
        }
        Ok(())
    }
}
