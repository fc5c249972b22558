// ABOUTME: Streaming chat routes turning one POST into a server-sent event stream
// ABOUTME: Authenticates the caller, validates the body, and relays orchestrator events
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Chat routes
//!
//! Every endpoint answers with `text/event-stream`. Authentication and body
//! validation happen before the stream opens and fail with a JSON error body;
//! anything after that is reported as an `error` frame.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderName},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::post,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::chat::ChatTurnRequest;
use crate::database::ConversationSource;
use crate::errors::{AppError, AppResult};
use crate::middleware::record_user_id;
use crate::server::ServerResources;

/// Body of a chat turn request
///
/// Field names are snake_case; the camelCase spellings used by older clients
/// are accepted as aliases.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatStreamRequest {
    /// Catalog model name
    pub model: String,
    /// User message text
    pub content: String,
    /// Ask the model for reasoning output
    #[serde(default, alias = "thinkingEnabled")]
    pub thinking_enabled: bool,
    /// Existing conversation to continue
    #[serde(default, alias = "conversationId")]
    pub conversation_id: Option<String>,
    /// Source tag for a new conversation
    #[serde(default)]
    pub source: Option<String>,
}

impl ChatStreamRequest {
    fn into_turn(self, user_id: String) -> AppResult<ChatTurnRequest> {
        let source = self
            .source
            .as_deref()
            .map(str::parse::<ConversationSource>)
            .transpose()?;

        let turn = ChatTurnRequest {
            user_id,
            model: self.model,
            content: self.content,
            thinking_enabled: self.thinking_enabled,
            conversation_id: self.conversation_id,
            source,
        };
        turn.validate()?;
        Ok(turn)
    }
}

/// Chat routes handler
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/chat/conversations", post(Self::create_conversation))
            .route(
                "/api/chat/conversations/:conversation_id/messages",
                post(Self::continue_conversation),
            )
            .route("/api/chat/stream", post(Self::stream))
            .with_state(resources)
    }

    /// Start a new conversation; `source` is required
    async fn create_conversation(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        body: Result<Json<ChatStreamRequest>, JsonRejection>,
    ) -> Result<impl IntoResponse, AppError> {
        let user_id = Self::authenticate(&resources, &headers)?;
        let mut request = Self::parse_body(body)?;
        request.conversation_id = None;
        Ok(Self::start_turn(&resources, request.into_turn(user_id)?))
    }

    /// Add a turn to an existing conversation; `source` is ignored
    async fn continue_conversation(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
        body: Result<Json<ChatStreamRequest>, JsonRejection>,
    ) -> Result<impl IntoResponse, AppError> {
        let user_id = Self::authenticate(&resources, &headers)?;
        let mut request = Self::parse_body(body)?;
        request.conversation_id = Some(conversation_id);
        request.source = None;
        Ok(Self::start_turn(&resources, request.into_turn(user_id)?))
    }

    /// Single-body form: continues when `conversation_id` is present
    async fn stream(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        body: Result<Json<ChatStreamRequest>, JsonRejection>,
    ) -> Result<impl IntoResponse, AppError> {
        let user_id = Self::authenticate(&resources, &headers)?;
        let request = Self::parse_body(body)?;
        Ok(Self::start_turn(&resources, request.into_turn(user_id)?))
    }

    fn authenticate(resources: &ServerResources, headers: &HeaderMap) -> AppResult<String> {
        let user = resources.verifier.authenticate(headers)?;
        record_user_id(&user.user_id);
        Ok(user.user_id)
    }

    fn parse_body(
        body: Result<Json<ChatStreamRequest>, JsonRejection>,
    ) -> AppResult<ChatStreamRequest> {
        body.map(|Json(request)| request)
            .map_err(|rejection| AppError::invalid_input(rejection.body_text()))
    }

    fn start_turn(resources: &ServerResources, turn: ChatTurnRequest) -> impl IntoResponse {
        let events = resources.chat.stream_chat(turn);
        (
            [
                (header::CACHE_CONTROL, "no-cache"),
                (HeaderName::from_static("x-accel-buffering"), "no"),
            ],
            Sse::new(Self::sse_frames(events)).keep_alive(KeepAlive::default()),
        )
    }

    fn sse_frames(
        events: impl Stream<Item = crate::chat::ChatEvent> + Send,
    ) -> impl Stream<Item = Result<Event, Infallible>> + Send {
        async_stream::stream! {
            let mut events = Box::pin(events);
            while let Some(event) = events.next().await {
                debug!(event = event.name(), "Sending chat event");
                yield Ok(event.to_sse_event());
            }
        }
    }
}
