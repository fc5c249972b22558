// ABOUTME: Anthropic Messages API adapter with extended thinking support
// ABOUTME: Lifts system messages into the system field and splits thinking from text deltas
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Anthropic Adapter
//!
//! Talks to `POST {base}/v1/messages`. System messages never appear in the
//! message list; they are joined into the top-level `system` field. With
//! thinking enabled the request carries a `thinking` block and no
//! temperature, since the API rejects both together.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::sse_parser::{create_sse_stream, FrameOutcome};
use super::transport::{CallMode, HttpTransport};
use super::{
    ChatMessage, LlmAdapter, LlmChunk, LlmChunkStream, LlmConfig, LlmResponse, Manufacturer,
    MessageRole, TokenUsage,
};
use crate::constants::anthropic::{
    API_VERSION, DEFAULT_BASE_URL, EVENT_CONTENT_BLOCK_DELTA, EVENT_ERROR, EVENT_MESSAGE_STOP,
    SYSTEM_PROMPT_SEPARATOR,
};
use crate::errors::{AppError, AppResult};

const SERVICE: &str = "Anthropic";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingParams>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ThinkingParams {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    // message_delta carries an untagged delta, so decoding waits for the event type
    delta: Option<serde_json::Value>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    ThinkingDelta {
        #[serde(default)]
        thinking: String,
    },
    TextDelta {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

// ============================================================================
// Adapter
// ============================================================================

/// Adapter for the Anthropic Messages API
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    transport: HttpTransport,
}

impl AnthropicAdapter {
    /// Create an adapter over a shared transport
    #[must_use]
    pub const fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    fn endpoint(config: &LlmConfig) -> String {
        let base = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/v1/messages", base.trim_end_matches('/'))
    }

    fn headers(config: &LlmConfig) -> Vec<(&'static str, String)> {
        vec![
            ("x-api-key", config.api_key.clone()),
            ("anthropic-version", API_VERSION.to_owned()),
        ]
    }
}

fn build_request<'a>(
    messages: &'a [ChatMessage],
    config: &'a LlmConfig,
    stream: bool,
) -> MessagesRequest<'a> {
    let system_parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .collect();
    let system = (!system_parts.is_empty()).then(|| system_parts.join(SYSTEM_PROMPT_SEPARATOR));

    let wire_messages = messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .collect();

    // max_tokens must exceed the thinking budget, so the budget is added on top
    let (max_tokens, temperature, thinking) = if config.thinking_enabled {
        (
            config.max_tokens.saturating_add(config.thinking_budget_tokens),
            None,
            Some(ThinkingParams {
                kind: "enabled",
                budget_tokens: config.thinking_budget_tokens,
            }),
        )
    } else {
        (config.max_tokens, Some(config.temperature), None)
    };

    MessagesRequest {
        model: &config.model,
        messages: wire_messages,
        max_tokens,
        system,
        temperature,
        thinking,
        stream,
    }
}

fn into_llm_response(response: MessagesResponse) -> LlmResponse {
    let mut content = String::new();
    let mut thinking = String::new();
    for block in response.content {
        match block {
            ContentBlock::Thinking { thinking: part } => thinking.push_str(&part),
            ContentBlock::Text { text } => content.push_str(&text),
            ContentBlock::Other => {}
        }
    }

    LlmResponse {
        content,
        thinking: (!thinking.is_empty()).then_some(thinking),
        model: response.model,
        usage: response.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            total_tokens: u.input_tokens.saturating_add(u.output_tokens),
        }),
    }
}

fn api_error(error: Option<ApiError>) -> AppError {
    let (kind, message) = error.map_or((None, None), |e| (e.kind, e.message));
    let message = message.unwrap_or_else(|| "upstream reported an error".to_owned());
    match kind.as_deref() {
        Some("rate_limit_error") => AppError::external_rate_limited(SERVICE, message),
        Some("overloaded_error") => AppError::external_unavailable(SERVICE, message),
        Some("authentication_error" | "permission_error") => {
            AppError::external_auth_failed(SERVICE, message)
        }
        _ => AppError::external_service(SERVICE, message),
    }
}

fn parse_frame(event: Option<&str>, data: &str) -> FrameOutcome {
    let parsed: StreamEvent = match serde_json::from_str(data) {
        Ok(parsed) => parsed,
        Err(e) => {
            return FrameOutcome::Fail(AppError::external_service(
                SERVICE,
                format!("Malformed stream event: {e}"),
            ))
        }
    };

    let kind = parsed.event_type.as_deref().or(event).unwrap_or_default();
    match kind {
        EVENT_CONTENT_BLOCK_DELTA => match parsed
            .delta
            .and_then(|delta| serde_json::from_value::<BlockDelta>(delta).ok())
        {
            Some(BlockDelta::ThinkingDelta { thinking }) => {
                FrameOutcome::Chunk(LlmChunk::thinking(thinking))
            }
            Some(BlockDelta::TextDelta { text }) => FrameOutcome::Chunk(LlmChunk::text(text)),
            // signature_delta, input_json_delta
            Some(BlockDelta::Other) | None => FrameOutcome::Skip,
        },
        EVENT_MESSAGE_STOP => FrameOutcome::End,
        EVENT_ERROR => FrameOutcome::Fail(api_error(parsed.error)),
        _ => FrameOutcome::Skip,
    }
}

#[async_trait]
impl LlmAdapter for AnthropicAdapter {
    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::Anthropic
    }

    #[instrument(skip_all, fields(model = %config.model, thinking = config.thinking_enabled))]
    async fn chat(&self, messages: &[ChatMessage], config: &LlmConfig) -> AppResult<LlmResponse> {
        let request = build_request(messages, config, false);
        let response = self
            .transport
            .post_json(
                SERVICE,
                &Self::endpoint(config),
                &Self::headers(config),
                &request,
                CallMode::SingleShot,
            )
            .await?;

        let body: MessagesResponse = HttpTransport::read_json(SERVICE, response).await?;
        let response = into_llm_response(body);
        debug!(
            content_len = response.content.len(),
            has_thinking = response.thinking.is_some(),
            "Received Anthropic response"
        );
        Ok(response)
    }

    #[instrument(skip_all, fields(model = %config.model, thinking = config.thinking_enabled))]
    async fn stream(
        &self,
        messages: &[ChatMessage],
        config: &LlmConfig,
    ) -> AppResult<LlmChunkStream> {
        let request = build_request(messages, config, true);
        let response = self
            .transport
            .post_json(
                SERVICE,
                &Self::endpoint(config),
                &Self::headers(config),
                &request,
                CallMode::Streaming,
            )
            .await?;

        Ok(create_sse_stream(
            response.bytes_stream(),
            parse_frame,
            SERVICE,
            self.transport.timeouts().stream_idle,
        ))
    }
}
