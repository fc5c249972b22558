// ABOUTME: Streaming chat orchestrator driving one turn from model resolution to commit
// ABOUTME: Stages the turn's rows, writes them in one short commit, and aborts the placeholder on failure
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Chat Turn Orchestration
//!
//! A turn moves through fixed phases:
//!
//! ```text
//! Opening     resolve model, acquire conversation     -> conversation.start
//! Persisting  user message, assistant placeholder     -> message.started
//! Connecting  completed-message context, open stream
//! Streaming   one upstream chunk per step             -> thinking.delta / text.delta
//! Finishing   persist the buffered output             -> message.done
//! Committing  metadata, title, commit                 -> conversation.done
//! ```
//!
//! Any error ends the turn with exactly one `error` event. Once the assistant
//! placeholder exists, the error path stores the partial output as `aborted`
//! and commits. Dropping the event stream mid-turn (client disconnect) does
//! the same in a background task.
//!
//! Rows are staged in a [`ChatSession`] while the model streams and reach the
//! database only when the turn commits or aborts, so a slow turn never holds
//! the store's write lock.

use std::mem;
use std::sync::Arc;

use futures_util::stream::unfold;
use futures_util::{Stream, StreamExt};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::events::ChatEvent;
use super::locks::{ConversationGuard, ConversationLocks};
use super::title::{clean_title, provisional_title, title_prompt};
use crate::config::LlmSettings;
use crate::constants::limits::{MAX_CONTENT_CHARS, MAX_MODEL_NAME_CHARS};
use crate::database::{
    now_timestamp, ChatSession, ConversationSource, Database, MessageStatus, NewMessage,
};
use crate::errors::{AppError, AppResult};
use crate::llm::{
    AdapterRegistry, ChatMessage, ChunkKind, LlmAdapter, LlmChunkStream, LlmConfig, MessageRole,
};
use crate::resolver::ModelResolver;

// ============================================================================
// Request
// ============================================================================

/// One user turn as received from the client
#[derive(Debug, Clone)]
pub struct ChatTurnRequest {
    /// Authenticated caller
    pub user_id: String,
    /// Catalog model name
    pub model: String,
    /// User message text
    pub content: String,
    /// Ask the model for reasoning output
    pub thinking_enabled: bool,
    /// Existing conversation to continue
    pub conversation_id: Option<String>,
    /// Source tag for a new conversation; ignored when continuing
    pub source: Option<ConversationSource>,
}

impl ChatTurnRequest {
    /// Check field limits before any work is done
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` or `MissingRequiredField` describing the first violation
    pub fn validate(&self) -> AppResult<()> {
        let model_chars = self.model.trim().chars().count();
        if model_chars == 0 {
            return Err(AppError::missing_field("model"));
        }
        if self.model.chars().count() > MAX_MODEL_NAME_CHARS {
            return Err(AppError::invalid_input(format!(
                "Model name must be at most {MAX_MODEL_NAME_CHARS} characters"
            )));
        }

        if self.content.trim().is_empty() {
            return Err(AppError::missing_field("content"));
        }
        if self.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(AppError::invalid_input(format!(
                "Content must be at most {MAX_CONTENT_CHARS} characters"
            )));
        }

        if self.conversation_id.is_none() && self.source.is_none() {
            return Err(AppError::missing_field("source"));
        }
        Ok(())
    }
}

// ============================================================================
// Service
// ============================================================================

/// Entry point for streaming chat turns
#[derive(Clone)]
pub struct ChatService {
    database: Database,
    registry: Arc<AdapterRegistry>,
    resolver: ModelResolver,
    locks: ConversationLocks,
    settings: LlmSettings,
}

impl ChatService {
    /// Create a chat service over shared server resources
    #[must_use]
    pub fn new(
        database: Database,
        registry: Arc<AdapterRegistry>,
        locks: ConversationLocks,
        settings: LlmSettings,
    ) -> Self {
        let resolver = ModelResolver::new(database.catalog());
        Self {
            database,
            registry,
            resolver,
            locks,
            settings,
        }
    }

    /// Run one turn, yielding outbound events as they happen
    ///
    /// The stream always ends with either `conversation.done` or a single
    /// `error` event. Dropping it early aborts the turn.
    pub fn stream_chat(&self, request: ChatTurnRequest) -> impl Stream<Item = ChatEvent> + Send {
        debug!(
            user_id = %request.user_id,
            model = %request.model,
            conversation_id = ?request.conversation_id,
            thinking = request.thinking_enabled,
            "Starting chat turn"
        );
        let turn = ChatTurn::new(self.clone(), request);
        unfold(turn, |mut turn| async move {
            let event = turn.advance().await?;
            Some((event, turn))
        })
    }
}

// ============================================================================
// Turn State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnPhase {
    Opening,
    Persisting,
    Connecting,
    Streaming,
    Finishing,
    Committing,
    Closed,
}

/// Everything fixed once the model and conversation are known
struct TurnContext {
    adapter: Arc<dyn LlmAdapter>,
    config: LlmConfig,
    conversation_id: String,
    needs_title: bool,
}

struct ChatTurn {
    service: ChatService,
    request: ChatTurnRequest,
    phase: TurnPhase,
    context: Option<TurnContext>,
    session: Option<ChatSession>,
    lock: Option<ConversationGuard>,
    placeholder_id: Option<String>,
    upstream: Option<LlmChunkStream>,
    content: String,
    thinking: String,
    chunk_count: usize,
}

fn open_session(session: &mut Option<ChatSession>) -> AppResult<&mut ChatSession> {
    session
        .as_mut()
        .ok_or_else(|| AppError::internal("Chat turn has no open session"))
}

fn turn_context(context: Option<&TurnContext>) -> AppResult<&TurnContext> {
    context.ok_or_else(|| AppError::internal("Chat turn used before it was opened"))
}

fn optional_text(text: &str) -> Option<&str> {
    (!text.is_empty()).then_some(text)
}

impl ChatTurn {
    fn new(service: ChatService, request: ChatTurnRequest) -> Self {
        Self {
            service,
            request,
            phase: TurnPhase::Opening,
            context: None,
            session: None,
            lock: None,
            placeholder_id: None,
            upstream: None,
            content: String::new(),
            thinking: String::new(),
            chunk_count: 0,
        }
    }

    /// Run phases until one produces an event; `None` once the turn is closed
    async fn advance(&mut self) -> Option<ChatEvent> {
        loop {
            let step = match self.phase {
                TurnPhase::Opening => self.open().await,
                TurnPhase::Persisting => self.persist_messages().await,
                TurnPhase::Connecting => self.connect_upstream().await,
                TurnPhase::Streaming => self.next_delta().await,
                TurnPhase::Finishing => self.finalize().await,
                TurnPhase::Committing => self.commit().await,
                TurnPhase::Closed => return None,
            };
            match step {
                Ok(Some(event)) => return Some(event),
                Ok(None) => {}
                Err(error) => return Some(self.fail(error).await),
            }
        }
    }

    async fn open(&mut self) -> AppResult<Option<ChatEvent>> {
        self.request.validate()?;

        let resolved = self.service.resolver.resolve(&self.request.model).await?;
        let adapter = self.service.registry.get(&resolved.model.manufacturer)?;
        let settings = &self.service.settings;
        let config = LlmConfig {
            api_key: resolved.provider.api_key.clone(),
            base_url: resolved.base_url().map(ToOwned::to_owned),
            model: resolved.model.name.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            thinking_enabled: self.request.thinking_enabled,
            thinking_budget_tokens: settings.thinking_budget_tokens,
        };

        let (conversation, is_new) = if let Some(conversation_id) = &self.request.conversation_id {
            self.lock = Some(self.service.locks.acquire(conversation_id).await);
            let session = self
                .session
                .insert(self.service.database.begin_session());
            let conversation = session
                .load_conversation(conversation_id)
                .await?
                .ok_or_else(|| AppError::not_found("Conversation"))?;
            if conversation.user_id != self.request.user_id {
                return Err(AppError::permission_denied(
                    "Conversation belongs to another user",
                ));
            }
            (conversation, false)
        } else {
            let source = self
                .request
                .source
                .ok_or_else(|| AppError::missing_field("source"))?;
            let title = provisional_title(&self.request.content);
            let session = self
                .session
                .insert(self.service.database.begin_session());
            let conversation = session
                .insert_conversation(&self.request.user_id, source, Some(&title), &resolved.model.name)?;
            (conversation, true)
        };

        info!(
            conversation_id = %conversation.id,
            model = %resolved.model.name,
            manufacturer = %resolved.model.manufacturer,
            provider = %resolved.provider.name,
            is_new,
            "Chat turn opened"
        );

        self.context = Some(TurnContext {
            adapter,
            config,
            conversation_id: conversation.id.clone(),
            needs_title: is_new || conversation.title.is_none(),
        });
        self.phase = TurnPhase::Persisting;
        Ok(Some(ChatEvent::ConversationStart {
            conversation_id: conversation.id,
            is_new,
            title: if is_new { conversation.title } else { None },
        }))
    }

    async fn persist_messages(&mut self) -> AppResult<Option<ChatEvent>> {
        let context = turn_context(self.context.as_ref())?;
        let session = open_session(&mut self.session)?;

        let order = session.next_message_order(&context.conversation_id).await?;
        session
            .insert_message(NewMessage {
                conversation_id: &context.conversation_id,
                user_id: &self.request.user_id,
                order,
                role: MessageRole::User,
                content: &self.request.content,
                model: None,
                status: MessageStatus::Completed,
            })
            .await?;

        let placeholder = session
            .insert_message(NewMessage {
                conversation_id: &context.conversation_id,
                user_id: &self.request.user_id,
                order: order + 1,
                role: MessageRole::Assistant,
                content: "",
                model: Some(&context.config.model),
                status: MessageStatus::Generating,
            })
            .await?;

        debug!(
            conversation_id = %context.conversation_id,
            message_id = %placeholder.id,
            user_order = order,
            "Assistant placeholder created"
        );

        self.placeholder_id = Some(placeholder.id.clone());
        self.phase = TurnPhase::Connecting;
        Ok(Some(ChatEvent::MessageStarted {
            message_id: placeholder.id,
        }))
    }

    async fn connect_upstream(&mut self) -> AppResult<Option<ChatEvent>> {
        let context = turn_context(self.context.as_ref())?;
        let session = open_session(&mut self.session)?;

        let history = session.completed_context(&context.conversation_id).await?;
        debug!(
            conversation_id = %context.conversation_id,
            context_messages = history.len(),
            "Opening upstream stream"
        );
        let upstream = context.adapter.stream(&history, &context.config).await?;

        self.upstream = Some(upstream);
        self.phase = TurnPhase::Streaming;
        Ok(None)
    }

    async fn next_delta(&mut self) -> AppResult<Option<ChatEvent>> {
        let upstream = self
            .upstream
            .as_mut()
            .ok_or_else(|| AppError::internal("Upstream stream missing"))?;

        match upstream.next().await {
            Some(Ok(chunk)) if chunk.content.is_empty() => Ok(None),
            Some(Ok(chunk)) => {
                self.chunk_count += 1;
                let event = match chunk.kind {
                    ChunkKind::Thinking => {
                        self.thinking.push_str(&chunk.content);
                        ChatEvent::ThinkingDelta {
                            delta: chunk.content,
                        }
                    }
                    ChunkKind::Text => {
                        self.content.push_str(&chunk.content);
                        ChatEvent::TextDelta {
                            delta: chunk.content,
                        }
                    }
                };
                Ok(Some(event))
            }
            Some(Err(error)) => {
                self.upstream = None;
                Err(error)
            }
            None => {
                self.upstream = None;
                self.phase = TurnPhase::Finishing;
                Ok(None)
            }
        }
    }

    async fn finalize(&mut self) -> AppResult<Option<ChatEvent>> {
        let message_id = self
            .placeholder_id
            .clone()
            .ok_or_else(|| AppError::internal("Assistant placeholder missing"))?;
        let thinking = optional_text(&self.thinking).map(ToOwned::to_owned);

        open_session(&mut self.session)?
            .finalize_message(
                &message_id,
                &self.content,
                thinking.as_deref(),
                MessageStatus::Completed,
            )
            .await?;

        self.phase = TurnPhase::Committing;
        Ok(Some(ChatEvent::MessageDone {
            message_id,
            content: self.content.clone(),
            thinking,
        }))
    }

    async fn commit(&mut self) -> AppResult<Option<ChatEvent>> {
        let context = turn_context(self.context.as_ref())?;
        let session = open_session(&mut self.session)?;

        session
            .touch_conversation(
                &context.conversation_id,
                &context.config.model,
                &now_timestamp(),
            )?;

        if context.needs_title {
            generate_title(session, context, &self.request.content, &self.content).await;
        }

        session.commit().await?;

        info!(
            conversation_id = %context.conversation_id,
            message_id = ?self.placeholder_id,
            model = %context.config.model,
            chunks = self.chunk_count,
            content_len = self.content.len(),
            thinking_len = self.thinking.len(),
            "Chat turn completed"
        );

        let conversation_id = context.conversation_id.clone();
        self.session = None;
        self.placeholder_id = None;
        self.lock = None;
        self.phase = TurnPhase::Closed;
        Ok(Some(ChatEvent::ConversationDone { conversation_id }))
    }

    /// Close the turn and produce its single error event
    async fn fail(&mut self, error: AppError) -> ChatEvent {
        self.phase = TurnPhase::Closed;
        self.upstream = None;

        let event = ChatEvent::from_error(&error);
        warn!(
            conversation_id = ?self.context.as_ref().map(|c| &c.conversation_id),
            message_id = ?self.placeholder_id,
            class = %error.class(),
            error = %error,
            "Chat turn failed"
        );

        match (self.session.take(), self.placeholder_id.take()) {
            (Some(mut session), Some(message_id)) => {
                abort_placeholder(
                    &mut session,
                    &message_id,
                    &self.content,
                    optional_text(&self.thinking),
                )
                .await;
            }
            (Some(mut session), None) => session.rollback(),
            (None, _) => {}
        }

        self.lock = None;
        event
    }
}

impl Drop for ChatTurn {
    fn drop(&mut self) {
        let (Some(mut session), Some(message_id)) =
            (self.session.take(), self.placeholder_id.take())
        else {
            return;
        };
        if !session.is_open() {
            return;
        }

        let content = mem::take(&mut self.content);
        let thinking = mem::take(&mut self.thinking);
        let lock = self.lock.take();

        match Handle::try_current() {
            Ok(handle) => {
                info!(message_id = %message_id, "Chat stream dropped mid-turn, aborting message");
                handle.spawn(async move {
                    abort_placeholder(&mut session, &message_id, &content, optional_text(&thinking))
                        .await;
                    drop(lock);
                });
            }
            Err(_) => {
                error!(
                    message_id = %message_id,
                    "Chat stream dropped outside a runtime, turn rolled back"
                );
            }
        }
    }
}

/// Best-effort: store partial output as `aborted` and commit; failures are logged
async fn abort_placeholder(
    session: &mut ChatSession,
    message_id: &str,
    content: &str,
    thinking: Option<&str>,
) {
    let result = async {
        session
            .finalize_message(message_id, content, thinking, MessageStatus::Aborted)
            .await?;
        session.commit().await
    }
    .await;

    match result {
        Ok(()) => debug!(message_id, content_len = content.len(), "Message marked aborted"),
        Err(e) => error!(message_id, error = %e, "Failed to mark message aborted"),
    }
}

/// Best-effort title generation; failures keep the current title
async fn generate_title(
    session: &mut ChatSession,
    context: &TurnContext,
    user_content: &str,
    assistant_content: &str,
) {
    let messages = [ChatMessage::user(title_prompt(user_content, assistant_content))];
    let response = match context
        .adapter
        .chat(&messages, &context.config.without_thinking())
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(conversation_id = %context.conversation_id, error = %e, "Title generation failed");
            return;
        }
    };

    let Some(title) = clean_title(&response.content) else {
        debug!(conversation_id = %context.conversation_id, "Model returned an empty title");
        return;
    };

    if let Err(e) = session.set_title(&context.conversation_id, &title) {
        warn!(conversation_id = %context.conversation_id, error = %e, "Failed to store title");
    }
}
