// ABOUTME: Route module organization for the chat server HTTP endpoints
// ABOUTME: Groups streaming chat, model catalog, and health routes by domain
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Route module
//!
//! Each domain module holds route definitions and thin handlers that
//! delegate to the service layer.

/// Streaming chat turn routes
pub mod chat;
/// Health check routes
pub mod health;
/// Model catalog routes
pub mod models;

/// Chat route handlers
pub use chat::{ChatRoutes, ChatStreamRequest};
/// Health route handlers
pub use health::HealthRoutes;
/// Model catalog route handlers
pub use models::ModelRoutes;
