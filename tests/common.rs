// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides the in-memory store, catalog seeding, a scripted adapter, and token minting
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
//! Shared test utilities for `converse_server`

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use anyhow::Result;
use async_trait::async_trait;
use converse_server::{
    auth::{JwtVerifier, TokenVerifier, ACCESS_TOKEN_TYPE},
    chat::{ChatEvent, ChatService, ChatTurnRequest, ConversationLocks},
    config::{
        AuthConfig, CorsConfig, DatabaseConfig, DatabaseUrl, Environment, LlmSettings,
        ServerConfig,
    },
    database::{ConversationSource, Database, ModelRecord, NewModel, NewProvider, ProviderRecord},
    errors::{AppError, AppResult, ErrorCode},
    llm::{
        AdapterRegistry, ChatMessage, LlmAdapter, LlmChunk, LlmChunkStream, LlmConfig,
        LlmResponse, Manufacturer,
    },
    server::ServerResources,
};
use futures_util::{stream, Stream, StreamExt};

static INIT_LOGGER: Once = Once::new();

/// Secret shared by test tokens and the test verifier
pub const TEST_JWT_SECRET: &str = "integration-test-secret-with-enough-entropy";

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Standard test database setup
pub async fn create_test_database() -> Result<Database> {
    init_test_logging();
    Ok(Database::in_memory().await?)
}

/// File-backed database in `dir`, pooled and in WAL mode like production
pub async fn create_file_database(dir: &Path) -> Result<Database> {
    init_test_logging();
    let config = DatabaseConfig {
        url: DatabaseUrl::SQLite {
            path: dir.join("converse.db"),
        },
        max_connections: 4,
        busy_timeout_secs: 1,
    };
    Ok(Database::new(&config).await?)
}

/// Create an enabled provider, model, and link in one go
pub async fn seed_model(
    database: &Database,
    model_name: &str,
    manufacturer: &str,
    provider_name: &str,
) -> Result<(ModelRecord, ProviderRecord)> {
    let catalog = database.catalog();
    let provider = catalog
        .create_provider(NewProvider {
            name: provider_name,
            api_key: "sk-test",
            base_url_map: HashMap::new(),
        })
        .await?;
    let model = catalog
        .create_model(NewModel {
            name: model_name,
            display_name: model_name,
            manufacturer,
        })
        .await?;
    catalog.link_model(&model.id, &provider.id).await?;
    Ok((model, provider))
}

// ============================================================================
// Scripted Adapter
// ============================================================================

/// One step of a scripted upstream stream
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Reasoning chunk
    Thinking(&'static str),
    /// Answer chunk
    Text(&'static str),
    /// Stream error
    Fail(ErrorCode, &'static str),
    /// Never yield again
    Hang,
}

/// Outcome of the single-shot `chat` call used for titles
#[derive(Debug, Clone)]
pub enum TitleReply {
    /// Return this text
    Text(&'static str),
    /// Fail with this code
    Fail(ErrorCode),
}

/// Adapter replaying a fixed script, reporting itself as `OpenAI`
pub struct ScriptedAdapter {
    steps: Vec<ScriptStep>,
    connect_error: Option<ErrorCode>,
    title: TitleReply,
    stream_calls: Mutex<Vec<(Vec<ChatMessage>, bool)>>,
    chat_calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedAdapter {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            connect_error: None,
            title: TitleReply::Text("Scripted title"),
            stream_calls: Mutex::new(Vec::new()),
            chat_calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail before any chunk is produced
    pub fn failing_connect(code: ErrorCode) -> Self {
        Self {
            connect_error: Some(code),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_title(mut self, title: TitleReply) -> Self {
        self.title = title;
        self
    }

    /// Context and thinking flag of every `stream` call
    pub fn stream_calls(&self) -> Vec<(Vec<ChatMessage>, bool)> {
        self.stream_calls.lock().unwrap().clone()
    }

    /// Number of `chat` calls (title generation)
    pub fn chat_call_count(&self) -> usize {
        self.chat_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmAdapter for ScriptedAdapter {
    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::OpenAi
    }

    async fn chat(&self, messages: &[ChatMessage], config: &LlmConfig) -> AppResult<LlmResponse> {
        self.chat_calls.lock().unwrap().push(messages.to_vec());
        match self.title {
            TitleReply::Text(text) => Ok(LlmResponse {
                content: text.to_owned(),
                thinking: None,
                model: config.model.clone(),
                usage: None,
            }),
            TitleReply::Fail(code) => Err(AppError::new(code, "title call failed")),
        }
    }

    async fn stream(&self, messages: &[ChatMessage], config: &LlmConfig) -> AppResult<LlmChunkStream> {
        self.stream_calls
            .lock()
            .unwrap()
            .push((messages.to_vec(), config.thinking_enabled));

        if let Some(code) = self.connect_error {
            return Err(AppError::new(code, "connect failed"));
        }

        let mut items: Vec<AppResult<LlmChunk>> = Vec::new();
        let mut hang = false;
        for step in &self.steps {
            match step {
                ScriptStep::Thinking(text) => items.push(Ok(LlmChunk::thinking(*text))),
                ScriptStep::Text(text) => items.push(Ok(LlmChunk::text(*text))),
                ScriptStep::Fail(code, message) => {
                    items.push(Err(AppError::new(*code, *message)));
                    break;
                }
                ScriptStep::Hang => {
                    hang = true;
                    break;
                }
            }
        }

        let chunks = stream::iter(items);
        if hang {
            Ok(Box::pin(chunks.chain(stream::pending())))
        } else {
            Ok(Box::pin(chunks))
        }
    }
}

// ============================================================================
// Service and Server Helpers
// ============================================================================

/// Registry containing only `adapter`
pub fn scripted_registry(adapter: Arc<ScriptedAdapter>) -> Arc<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();
    registry.register(adapter);
    Arc::new(registry)
}

/// Chat service over `database` answering with `adapter`
pub fn create_chat_service(database: &Database, adapter: Arc<ScriptedAdapter>) -> ChatService {
    ChatService::new(
        database.clone(),
        scripted_registry(adapter),
        ConversationLocks::new(),
        LlmSettings::default(),
    )
}

/// Configuration usable without any environment variables
pub fn test_config() -> ServerConfig {
    ServerConfig {
        http_port: 0,
        host: "127.0.0.1".to_owned(),
        environment: Environment::Testing,
        database: DatabaseConfig::in_memory(),
        auth: AuthConfig {
            jwt_secret: TEST_JWT_SECRET.to_owned(),
        },
        llm: LlmSettings::default(),
        cors: CorsConfig {
            allowed_origins: "*".to_owned(),
        },
    }
}

/// Server resources wired to the scripted adapter
pub fn create_test_resources(
    database: &Database,
    adapter: Arc<ScriptedAdapter>,
) -> Arc<ServerResources> {
    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(TEST_JWT_SECRET));
    Arc::new(ServerResources::new(
        database.clone(),
        scripted_registry(adapter),
        verifier,
        Arc::new(test_config()),
    ))
}

/// Signed access token for `user_id`
pub fn create_test_token(user_id: &str) -> String {
    JwtVerifier::new(TEST_JWT_SECRET)
        .issue_token(user_id, ACCESS_TOKEN_TYPE, chrono::Duration::hours(1))
        .unwrap()
}

/// Request for a new conversation
pub fn new_turn(user_id: &str, model: &str, content: &str) -> ChatTurnRequest {
    ChatTurnRequest {
        user_id: user_id.to_owned(),
        model: model.to_owned(),
        content: content.to_owned(),
        thinking_enabled: false,
        conversation_id: None,
        source: Some(ConversationSource::GeneralChat),
    }
}

/// Request continuing `conversation_id`
pub fn continue_turn(
    user_id: &str,
    model: &str,
    content: &str,
    conversation_id: &str,
) -> ChatTurnRequest {
    ChatTurnRequest {
        conversation_id: Some(conversation_id.to_owned()),
        source: None,
        ..new_turn(user_id, model, content)
    }
}

/// Drain a turn
pub async fn collect_events(events: impl Stream<Item = ChatEvent>) -> Vec<ChatEvent> {
    events.collect().await
}

/// Conversation id carried by the first frame
pub fn conversation_id_of(events: &[ChatEvent]) -> String {
    match events.first() {
        Some(ChatEvent::ConversationStart {
            conversation_id, ..
        }) => conversation_id.clone(),
        other => panic!("expected conversation.start first, got {other:?}"),
    }
}

/// Frame kinds in order
pub fn event_names(events: &[ChatEvent]) -> Vec<&'static str> {
    events.iter().map(ChatEvent::name).collect()
}
