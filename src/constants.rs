// ABOUTME: Application constants re-exported from the core crate
// ABOUTME: Keeps `crate::constants::*` paths stable for server modules
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

pub use converse_core::constants::*;
