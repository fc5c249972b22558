// ABOUTME: LLM adapter abstraction layer for manufacturer-specific model APIs
// ABOUTME: Defines neutral messages, generation config, chunk stream, and the adapter contract
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # LLM Adapter Interface
//!
//! Each model manufacturer speaks its own wire protocol. An [`LlmAdapter`]
//! translates a manufacturer-neutral message list plus an [`LlmConfig`] into
//! one upstream call, and translates the answer back into either a single
//! [`LlmResponse`] or a lazy stream of [`LlmChunk`] values.
//!
//! ## Key Concepts
//!
//! - **`Manufacturer`**: closed set of upstream vendors; selects the adapter
//! - **`LlmChunk`**: one incremental piece of output, tagged thinking or text
//! - **`AdapterRegistry`**: immutable manufacturer to adapter mapping built at startup
//!
//! ## Example: Streaming a Reply
//!
//! ```rust,no_run
//! use converse_server::llm::{ChatMessage, LlmAdapter, LlmConfig};
//! use futures_util::StreamExt;
//!
//! async fn example(adapter: &dyn LlmAdapter, config: &LlmConfig) {
//!     let messages = vec![ChatMessage::user("Hello")];
//!     if let Ok(mut stream) = adapter.stream(&messages, config).await {
//!         while let Some(Ok(chunk)) = stream.next().await {
//!             print!("{}", chunk.content);
//!         }
//!     }
//! }
//! ```

mod anthropic;
mod openai;
mod registry;
pub mod sse_parser;
mod transport;

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;
pub use registry::AdapterRegistry;
pub use transport::{CallMode, HttpTransport, UpstreamTimeouts};

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use crate::errors::{AppError, AppResult};

// ============================================================================
// Manufacturers
// ============================================================================

/// Upstream model vendor whose wire protocol an adapter implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Manufacturer {
    /// OpenAI Responses API
    OpenAi,
    /// Anthropic Messages API
    Anthropic,
}

impl Manufacturer {
    /// Identifier stored in the catalog and used as the base URL map key
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    /// Every known manufacturer
    #[must_use]
    pub const fn all() -> [Self; 2] {
        [Self::OpenAi, Self::Anthropic]
    }
}

impl FromStr for Manufacturer {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(AppError::unregistered_manufacturer(other)),
        }
    }
}

impl fmt::Display for Manufacturer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instruction message
    System,
    /// User input message
    User,
    /// Assistant response message
    Assistant,
}

impl MessageRole {
    /// Convert to string representation for API calls
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for MessageRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(AppError::invalid_input(format!("Unknown message role: {other}"))),
        }
    }
}

/// A single message in a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: MessageRole,
    /// Content of the message
    pub content: String,
}

impl ChatMessage {
    /// Create a new chat message
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Per-call generation configuration, built by the caller from the catalog
#[derive(Clone)]
pub struct LlmConfig {
    /// Provider API key
    pub api_key: String,
    /// Base URL override; the adapter default is used when absent
    pub base_url: Option<String>,
    /// Upstream model name
    pub model: String,
    /// Sampling temperature (ignored by adapters that forbid it with thinking)
    pub temperature: f32,
    /// Output token cap
    pub max_tokens: u32,
    /// Request reasoning output
    pub thinking_enabled: bool,
    /// Reasoning budget when thinking is enabled
    pub thinking_budget_tokens: u32,
}

impl LlmConfig {
    /// Same credentials and model with reasoning switched off
    #[must_use]
    pub fn without_thinking(&self) -> Self {
        Self {
            thinking_enabled: false,
            ..self.clone()
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("thinking_enabled", &self.thinking_enabled)
            .field("thinking_budget_tokens", &self.thinking_budget_tokens)
            .finish()
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    pub input_tokens: u32,
    /// Number of tokens generated
    pub output_tokens: u32,
    /// Total tokens billed for the call
    pub total_tokens: u32,
}

/// Response from a single-shot call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Full answer text
    pub content: String,
    /// Full reasoning text, if any was produced
    pub thinking: Option<String>,
    /// Model id reported by the upstream
    pub model: String,
    /// Token usage statistics
    pub usage: Option<TokenUsage>,
}

/// Which output channel a chunk belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Reasoning output
    Thinking,
    /// Answer text
    Text,
}

/// One incremental unit of model output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmChunk {
    /// Output channel
    pub kind: ChunkKind,
    /// Delta text
    pub content: String,
}

impl LlmChunk {
    /// Reasoning delta
    #[must_use]
    pub fn thinking(content: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Thinking,
            content: content.into(),
        }
    }

    /// Answer text delta
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Text,
            content: content.into(),
        }
    }
}

/// Stream type for incremental model output
pub type LlmChunkStream = Pin<Box<dyn Stream<Item = AppResult<LlmChunk>> + Send>>;

// ============================================================================
// Adapter Trait
// ============================================================================

/// Manufacturer-specific translation between neutral messages and a wire API
///
/// Adapters never retry. Upstream failures surface as `AppError` values with
/// external-service codes.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Manufacturer this adapter speaks for
    fn manufacturer(&self) -> Manufacturer;

    /// Single-shot completion
    async fn chat(&self, messages: &[ChatMessage], config: &LlmConfig) -> AppResult<LlmResponse>;

    /// Incremental completion
    ///
    /// The returned stream yields chunks in upstream order and ends when the
    /// upstream signals completion. Dropping it cancels the upstream request.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        config: &LlmConfig,
    ) -> AppResult<LlmChunkStream>;
}
