// ABOUTME: HTTP middleware for request tracing, request ids, and cross-origin access
// ABOUTME: Provides the span factory, request id generator, and CORS layer used by the server
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

pub mod cors;
pub mod tracing;

// CORS configuration
pub use cors::setup_cors;

// Request tracing and correlation
pub use tracing::{create_request_span, record_user_id, RequestIdMaker, REQUEST_ID_HEADER};
