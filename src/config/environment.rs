// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Builds the server, auth, LLM generation, and upstream timeout settings from env vars
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Environment-based configuration management for production deployment

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::database::DatabaseConfig;
use super::{env_parse_or, env_var_or};
use crate::constants::{llm, ports};
use crate::errors::{AppError, AppResult};

/// Environment type for security and other configurations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// Production deployment
    Production,
    /// Automated tests
    Testing,
}

impl Environment {
    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "testing" | "test" => Self::Testing,
            _ => Self::Development,
        }
    }

    /// Check if this is a production environment
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
            Self::Testing => write!(f, "testing"),
        }
    }
}

/// Access token verification settings
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the session service that issues tokens
    pub jwt_secret: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .finish()
    }
}

/// Generation parameters and upstream timeouts shared by every turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Sampling temperature when thinking is disabled
    pub temperature: f32,
    /// Output token cap
    pub max_tokens: u32,
    /// Reasoning budget when thinking is enabled
    pub thinking_budget_tokens: u32,
    /// TCP/TLS connect timeout for upstream calls
    pub connect_timeout_secs: u64,
    /// Maximum wait between two upstream stream chunks
    pub stream_idle_timeout_secs: u64,
    /// Whole-request timeout for single-shot calls
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            temperature: llm::DEFAULT_TEMPERATURE,
            max_tokens: llm::DEFAULT_MAX_TOKENS,
            thinking_budget_tokens: llm::DEFAULT_THINKING_BUDGET_TOKENS,
            connect_timeout_secs: llm::DEFAULT_CONNECT_TIMEOUT_SECS,
            stream_idle_timeout_secs: llm::DEFAULT_STREAM_IDLE_TIMEOUT_SECS,
            request_timeout_secs: llm::DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl LlmSettings {
    /// Load generation settings from environment
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric value cannot be parsed
    pub fn from_env() -> AppResult<Self> {
        let settings = Self {
            temperature: env_parse_or("LLM_TEMPERATURE", llm::DEFAULT_TEMPERATURE)?,
            max_tokens: env_parse_or("LLM_MAX_TOKENS", llm::DEFAULT_MAX_TOKENS)?,
            thinking_budget_tokens: env_parse_or(
                "LLM_THINKING_BUDGET_TOKENS",
                llm::DEFAULT_THINKING_BUDGET_TOKENS,
            )?,
            connect_timeout_secs: env_parse_or(
                "LLM_CONNECT_TIMEOUT_SECS",
                llm::DEFAULT_CONNECT_TIMEOUT_SECS,
            )?,
            stream_idle_timeout_secs: env_parse_or(
                "LLM_STREAM_IDLE_TIMEOUT_SECS",
                llm::DEFAULT_STREAM_IDLE_TIMEOUT_SECS,
            )?,
            request_timeout_secs: env_parse_or(
                "LLM_REQUEST_TIMEOUT_SECS",
                llm::DEFAULT_REQUEST_TIMEOUT_SECS,
            )?,
        };

        if !(0.0..=2.0).contains(&settings.temperature) {
            return Err(AppError::config_invalid(format!(
                "LLM_TEMPERATURE must be between 0 and 2, got {}",
                settings.temperature
            )));
        }
        if settings.max_tokens == 0 {
            return Err(AppError::config_invalid("LLM_MAX_TOKENS must be positive"));
        }
        Ok(settings)
    }

    /// Connect timeout as a `Duration`
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Stream idle timeout as a `Duration`
    #[must_use]
    pub const fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    /// Single-shot request timeout as a `Duration`
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Cross-origin settings for browser clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Comma separated origin list, or `*`
    pub allowed_origins: String,
}

/// Complete server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP API port
    pub http_port: u16,
    /// Bind address
    pub host: String,
    /// Deployment environment
    pub environment: Environment,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// LLM generation settings
    pub llm: LlmSettings,
    /// CORS configuration
    pub cors: CorsConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is invalid
    pub fn from_env() -> AppResult<Self> {
        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::config_missing("JWT_SECRET"))?;

        Ok(Self {
            http_port: env_parse_or("HTTP_PORT", ports::DEFAULT_HTTP_PORT)?,
            host: env_var_or("HOST", "127.0.0.1"),
            environment: Environment::from_str_or_default(&env_var_or(
                "ENVIRONMENT",
                "development",
            )),
            database: DatabaseConfig::from_env()?,
            auth: AuthConfig { jwt_secret },
            llm: LlmSettings::from_env()?,
            cors: CorsConfig {
                allowed_origins: env_var_or("CORS_ALLOWED_ORIGINS", "*"),
            },
        })
    }

    /// Socket address string for the listener
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    /// Get a summary of the configuration for logging (without secrets)
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Converse Server Configuration:\n\
             - Bind: {}\n\
             - Environment: {}\n\
             - Database: {} (max connections: {})\n\
             - LLM defaults: temperature={}, max_tokens={}, thinking_budget={}\n\
             - Upstream timeouts: connect={}s, stream idle={}s, request={}s\n\
             - CORS origins: {}",
            self.bind_address(),
            self.environment,
            self.database.url,
            self.database.max_connections,
            self.llm.temperature,
            self.llm.max_tokens,
            self.llm.thinking_budget_tokens,
            self.llm.connect_timeout_secs,
            self.llm.stream_idle_timeout_secs,
            self.llm.request_timeout_secs,
            self.cors.allowed_origins,
        )
    }
}
