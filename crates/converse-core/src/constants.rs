// ABOUTME: Application constants grouped by domain
// ABOUTME: Endpoints, ports, request limits, LLM defaults, and upstream wire constants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Constants module
//!
//! Constants are grouped into small domain modules rather than one flat list.

/// API endpoints
pub mod endpoints {
    /// Health check endpoint
    pub const HEALTH_CHECK: &str = "/health";
    /// API base path
    pub const API_BASE: &str = "/api";
}

/// Network ports
pub mod ports {
    /// Default HTTP port
    pub const DEFAULT_HTTP_PORT: u16 = 8081;
}

/// Inbound chat request limits
pub mod limits {
    /// Maximum characters in a user message
    pub const MAX_CONTENT_CHARS: usize = 50_000;
    /// Maximum characters in a model name
    pub const MAX_MODEL_NAME_CHARS: usize = 100;
    /// Maximum characters kept for a conversation title
    pub const MAX_TITLE_CHARS: usize = 200;
    /// Characters of each side of the first turn fed to the title prompt
    pub const TITLE_CONTEXT_CHARS: usize = 500;
}

/// Generation defaults applied when the environment does not override them
pub mod llm {
    /// Default sampling temperature
    pub const DEFAULT_TEMPERATURE: f32 = 1.0;
    /// Default output token cap
    pub const DEFAULT_MAX_TOKENS: u32 = 4096;
    /// Default reasoning budget when thinking is enabled
    pub const DEFAULT_THINKING_BUDGET_TOKENS: u32 = 10_000;
    /// Temperature the OpenAI Responses API requires for reasoning models
    pub const REASONING_TEMPERATURE: f32 = 1.0;
    /// Reasoning effort requested from OpenAI-style models
    pub const REASONING_EFFORT: &str = "medium";
    /// Reasoning summary mode requested so thinking deltas are streamed
    pub const REASONING_SUMMARY: &str = "auto";
    /// Default connect timeout for upstream calls
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
    /// Default maximum wait for the next upstream stream chunk
    pub const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 120;
    /// Default whole-request timeout for single-shot calls
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
    /// Upstream error bodies are truncated to this many characters in messages
    pub const MAX_ERROR_BODY_CHARS: usize = 500;
}

/// OpenAI Responses API wire constants
pub mod openai {
    /// Default API base URL (includes the version segment)
    pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
    /// Text output delta event
    pub const EVENT_TEXT_DELTA: &str = "response.output_text.delta";
    /// Reasoning summary delta event
    pub const EVENT_REASONING_DELTA: &str = "response.reasoning_summary_text.delta";
    /// Terminal success event
    pub const EVENT_COMPLETED: &str = "response.completed";
    /// Terminal failure event
    pub const EVENT_FAILED: &str = "response.failed";
    /// Stream-level error event
    pub const EVENT_ERROR: &str = "error";
}

/// Anthropic Messages API wire constants
pub mod anthropic {
    /// Default API base URL (the version segment is part of the path)
    pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
    /// Pinned API version header value
    pub const API_VERSION: &str = "2023-06-01";
    /// Content delta event
    pub const EVENT_CONTENT_BLOCK_DELTA: &str = "content_block_delta";
    /// Terminal success event
    pub const EVENT_MESSAGE_STOP: &str = "message_stop";
    /// Stream-level error event
    pub const EVENT_ERROR: &str = "error";
    /// Separator used when joining several system prompts
    pub const SYSTEM_PROMPT_SEPARATOR: &str = "\n\n";
}

/// Error-related constants
pub mod errors {
    /// Fixed client message for upstream timeouts
    pub const MODEL_TIMEOUT_MESSAGE: &str = "The model service timed out, please try again later";
    /// Lowercase markers that identify throttling in upstream error text
    pub const RATE_LIMIT_MARKERS: &[&str] = &["rate", "429"];
}

/// Service identity
pub mod service_names {
    /// Default service name used in logs
    pub const CONVERSE_SERVER: &str = "converse-server";
}
