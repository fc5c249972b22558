// ABOUTME: Streaming chat module tying resolution, persistence, and adapters into one turn
// ABOUTME: Exposes the chat service, its request type, and the outbound event protocol
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Streaming chat turns
//!
//! [`ChatService::stream_chat`] turns one [`ChatTurnRequest`] into a stream of
//! [`ChatEvent`] values while recording the conversation and both messages.

mod events;
mod locks;
mod orchestrator;
mod title;

pub use events::ChatEvent;
pub use locks::{ConversationGuard, ConversationLocks};
pub use orchestrator::{ChatService, ChatTurnRequest};
