// ABOUTME: OpenAI Responses API adapter with reasoning summary support
// ABOUTME: Routes reasoning-summary deltas to thinking chunks and output-text deltas to text chunks
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # `OpenAI` Adapter
//!
//! Talks to `POST {base}/responses`. With thinking enabled the request carries
//! a `reasoning` block and the fixed reasoning temperature; otherwise the
//! configured temperature is sent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::sse_parser::{create_sse_stream, FrameOutcome};
use super::transport::{CallMode, HttpTransport};
use super::{
    ChatMessage, LlmAdapter, LlmChunk, LlmChunkStream, LlmConfig, LlmResponse, Manufacturer,
    TokenUsage,
};
use crate::constants::llm::{REASONING_EFFORT, REASONING_SUMMARY, REASONING_TEMPERATURE};
use crate::constants::openai::{
    DEFAULT_BASE_URL, EVENT_COMPLETED, EVENT_ERROR, EVENT_FAILED, EVENT_REASONING_DELTA,
    EVENT_TEXT_DELTA,
};
use crate::errors::{AppError, AppResult};

const SERVICE: &str = "OpenAI";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<InputMessage<'a>>,
    max_output_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningParams>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ReasoningParams {
    effort: &'static str,
    summary: &'static str,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    output: Vec<OutputItem>,
    usage: Option<ResponsesUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Reasoning {
        #[serde(default)]
        summary: Vec<TextPart>,
    },
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    OutputText {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponsesUsage {
    input_tokens: u32,
    output_tokens: u32,
    total_tokens: u32,
}

/// One streamed event body; `type` repeats the SSE event name
#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    #[serde(default)]
    delta: String,
    code: Option<String>,
    message: Option<String>,
    response: Option<FailedResponse>,
}

#[derive(Debug, Deserialize)]
struct FailedResponse {
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<String>,
    message: Option<String>,
}

// ============================================================================
// Adapter
// ============================================================================

/// Adapter for the `OpenAI` Responses API
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    transport: HttpTransport,
}

impl OpenAiAdapter {
    /// Create an adapter over a shared transport
    #[must_use]
    pub const fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    fn endpoint(config: &LlmConfig) -> String {
        let base = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/responses", base.trim_end_matches('/'))
    }

    fn headers(config: &LlmConfig) -> Vec<(&'static str, String)> {
        vec![("Authorization", format!("Bearer {}", config.api_key))]
    }
}

fn build_request<'a>(
    messages: &'a [ChatMessage],
    config: &'a LlmConfig,
    stream: bool,
) -> ResponsesRequest<'a> {
    let (temperature, reasoning) = if config.thinking_enabled {
        (
            REASONING_TEMPERATURE,
            Some(ReasoningParams {
                effort: REASONING_EFFORT,
                summary: REASONING_SUMMARY,
            }),
        )
    } else {
        (config.temperature, None)
    };

    ResponsesRequest {
        model: &config.model,
        input: messages
            .iter()
            .map(|m| InputMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect(),
        max_output_tokens: config.max_tokens,
        temperature,
        reasoning,
        stream,
    }
}

fn into_llm_response(response: ResponsesResponse) -> LlmResponse {
    let mut content = String::new();
    let mut thinking = String::new();
    for item in response.output {
        match item {
            OutputItem::Reasoning { summary } => {
                summary.iter().for_each(|part| thinking.push_str(&part.text));
            }
            OutputItem::Message { content: parts } => {
                for part in parts {
                    if let ContentPart::OutputText { text } = part {
                        content.push_str(&text);
                    }
                }
            }
            OutputItem::Other => {}
        }
    }

    LlmResponse {
        content,
        thinking: (!thinking.is_empty()).then_some(thinking),
        model: response.model,
        usage: response.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

fn api_error(code: Option<&str>, message: Option<&str>) -> AppError {
    let message = message.unwrap_or("upstream reported an error").to_owned();
    match code {
        Some("rate_limit_exceeded") => AppError::external_rate_limited(SERVICE, message),
        Some("server_is_overloaded") => AppError::external_unavailable(SERVICE, message),
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
        EVENT_TEXT_DELTA => FrameOutcome::Chunk(LlmChunk::text(parsed.delta)),
        EVENT_REASONING_DELTA => FrameOutcome::Chunk(LlmChunk::thinking(parsed.delta)),
        EVENT_COMPLETED => FrameOutcome::End,
        EVENT_FAILED => {
            let error = parsed.response.and_then(|r| r.error);
            FrameOutcome::Fail(api_error(
                error.as_ref().and_then(|e| e.code.as_deref()),
                error.as_ref().and_then(|e| e.message.as_deref()),
            ))
        }
        EVENT_ERROR => FrameOutcome::Fail(api_error(
            parsed.code.as_deref(),
            parsed.message.as_deref(),
        )),
        _ => FrameOutcome::Skip,
    }
}

#[async_trait]
impl LlmAdapter for OpenAiAdapter {
    fn manufacturer(&self) -> Manufacturer {
        Manufacturer::OpenAi
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

        let body: ResponsesResponse = HttpTransport::read_json(SERVICE, response).await?;
        let response = into_llm_response(body);
        debug!(
            content_len = response.content.len(),
            has_thinking = response.thinking.is_some(),
            "Received OpenAI response"
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
