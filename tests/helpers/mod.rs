// ABOUTME: Shared test helpers for integration tests
// ABOUTME: Exports the axum request helper and SSE frame parsing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod axum_test;
