// ABOUTME: Main library entry point for the streaming chat server
// ABOUTME: Resolves catalog models, streams LLM turns over SSE, and persists conversations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # Converse Server
//!
//! A chat backend that turns one user message into a live stream of
//! reasoning and answer fragments from a configured LLM, while recording the
//! conversation durably.
//!
//! ## Features
//!
//! - **Model catalog**: models, upstream providers, and the links between
//!   them, each independently enabled
//! - **Multi-manufacturer adapters**: `OpenAI` Responses API and `Anthropic`
//!   Messages API behind one streaming contract
//! - **Durable turns**: one transaction per turn; failures and client
//!   disconnects leave an `aborted` assistant message with the partial output
//! - **Server-sent events**: a fixed set of frame kinds ending in either
//!   `conversation.done` or a single `error`
//!
//! ## Architecture
//!
//! - **Config**: environment-driven server, database, and LLM settings
//! - **Database**: `SQLite` store for the catalog, conversations, and messages
//! - **LLM**: adapter trait, wire adapters, SSE parser, and registry
//! - **Resolver**: model name to usable `(model, provider)` pair
//! - **Chat**: the turn orchestrator and its event protocol
//! - **Routes**: axum routers for chat, models, and health
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use converse_server::config::ServerConfig;
//! use converse_server::errors::AppResult;
//! use converse_server::server::{run, ServerResources};
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env()?;
//!     let resources = ServerResources::from_config(config).await?;
//!     run(resources).await
//! }
//! ```

/// Bearer access-token verification
pub mod auth;

/// Streaming chat orchestration and the outbound event protocol
pub mod chat;

/// Configuration management
pub mod config;

/// Application constants
pub mod constants;

/// Chat store: catalog, conversations, messages
pub mod database;

/// Unified error handling
pub mod errors;

/// LLM adapters for manufacturer wire protocols
pub mod llm;

/// Structured logging setup
pub mod logging;

/// HTTP middleware: request ids, tracing spans, CORS
pub mod middleware;

/// Model name resolution against the catalog
pub mod resolver;

/// HTTP routes
pub mod routes;

/// Resource container, router assembly, and serve loop
pub mod server;
