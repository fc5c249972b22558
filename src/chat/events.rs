// ABOUTME: Outbound chat event protocol with seven frame kinds and snake_case JSON payloads
// ABOUTME: Renders events as axum SSE events or raw `event:`/`data:` text frames
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use axum::response::sse::Event;
use serde_json::{json, Value};

use crate::errors::{AppError, ErrorClass};

/// One outbound frame of a chat turn
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// First frame of every turn
    ConversationStart {
        /// Conversation the turn belongs to
        conversation_id: String,
        /// Whether the conversation was created by this turn
        is_new: bool,
        /// Provisional title, only for new conversations
        title: Option<String>,
    },
    /// Assistant placeholder exists
    MessageStarted {
        /// Placeholder message id
        message_id: String,
    },
    /// Reasoning delta
    ThinkingDelta {
        /// Delta text
        delta: String,
    },
    /// Answer delta
    TextDelta {
        /// Delta text
        delta: String,
    },
    /// Full assistant output after the upstream finished
    MessageDone {
        /// Assistant message id
        message_id: String,
        /// Concatenation of every text delta
        content: String,
        /// Concatenation of every thinking delta, if any
        thinking: Option<String>,
    },
    /// Turn committed
    ConversationDone {
        /// Conversation the turn belongs to
        conversation_id: String,
    },
    /// Turn failed; always the last frame
    Error {
        /// Outbound error class
        class: ErrorClass,
        /// Client-facing message
        message: String,
    },
}

impl ChatEvent {
    /// Error frame for a failed turn
    #[must_use]
    pub fn from_error(error: &AppError) -> Self {
        Self::Error {
            class: error.class(),
            message: error.client_message(),
        }
    }

    /// Frame kind as written on the `event:` line
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConversationStart { .. } => "conversation.start",
            Self::MessageStarted { .. } => "message.started",
            Self::ThinkingDelta { .. } => "thinking.delta",
            Self::TextDelta { .. } => "text.delta",
            Self::MessageDone { .. } => "message.done",
            Self::ConversationDone { .. } => "conversation.done",
            Self::Error { .. } => "error",
        }
    }

    /// JSON payload written on the `data:` line
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::ConversationStart {
                conversation_id,
                is_new,
                title,
            } => {
                let mut payload = json!({
                    "conversation_id": conversation_id,
                    "is_new": is_new,
                });
                if let Some(title) = title {
                    payload["title"] = json!(title);
                }
                payload
            }
            Self::MessageStarted { message_id } => json!({ "message_id": message_id }),
            Self::ThinkingDelta { delta } | Self::TextDelta { delta } => json!({ "delta": delta }),
            Self::MessageDone {
                message_id,
                content,
                thinking,
            } => json!({
                "message_id": message_id,
                "content": content,
                "thinking": thinking,
            }),
            Self::ConversationDone { conversation_id } => {
                json!({ "conversation_id": conversation_id })
            }
            Self::Error { class, message } => json!({
                "type": class.as_str(),
                "message": message,
            }),
        }
    }

    /// Whether this frame ends the turn
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ConversationDone { .. } | Self::Error { .. })
    }

    /// Raw text frame: `event: <kind>\ndata: <json>\n\n`
    #[must_use]
    pub fn to_frame(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name(), self.payload())
    }

    /// Axum SSE event carrying the same kind and payload
    #[must_use]
    pub fn to_sse_event(&self) -> Event {
        Event::default()
            .event(self.name())
            .data(self.payload().to_string())
    }
}
