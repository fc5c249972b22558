// ABOUTME: Unified error handling re-exported from the core crate
// ABOUTME: Gives server modules a single `crate::errors` path for AppError and friends
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

pub use converse_core::errors::*;
