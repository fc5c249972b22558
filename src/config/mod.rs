// ABOUTME: Configuration management module for centralized server settings
// ABOUTME: Environment-driven server, database, auth, and LLM generation settings
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Configuration module
//!
//! All settings come from environment variables:
//!
//! - **Environment**: Server, auth, CORS, and LLM generation settings
//! - **Database**: Store location and pool sizing

use std::env;
use std::str::FromStr;

use crate::errors::{AppError, AppResult};

/// Database configuration
pub mod database;
/// Environment and server configuration
pub mod environment;

pub use database::{DatabaseConfig, DatabaseUrl};
pub use environment::{AuthConfig, CorsConfig, Environment, LlmSettings, ServerConfig};

/// Read an environment variable or fall back to a default
pub(crate) fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse an environment variable, using `default` when unset
///
/// A value that is set but unparseable is a configuration error rather than
/// a silent fallback.
pub(crate) fn env_parse_or<T>(key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| {
            AppError::config_invalid(format!("Invalid {key} value '{raw}': {e}"))
        }),
        _ => Ok(default),
    }
}
