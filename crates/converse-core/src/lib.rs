// ABOUTME: Core types and constants for the Converse streaming chat service
// ABOUTME: Foundation crate with error handling, outbound error classes, and constants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # Converse Core
//!
//! Foundation crate shared by the chat server. It changes infrequently, which
//! keeps incremental builds of the server crate fast.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError`, `ErrorCode`, and the
//!   outbound `ErrorClass` used by the chat event stream
//! - **constants**: Application-wide constants organized by domain

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Application constants organized by domain
pub mod constants;
