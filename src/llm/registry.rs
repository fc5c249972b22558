// ABOUTME: Manufacturer to adapter mapping built once at startup
// ABOUTME: Unknown or unregistered manufacturers fail lookup with a configuration-class error
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::transport::{HttpTransport, UpstreamTimeouts};
use super::{AnthropicAdapter, LlmAdapter, Manufacturer, OpenAiAdapter};
use crate::config::LlmSettings;
use crate::errors::{AppError, AppResult};

/// Registry of adapters keyed by manufacturer
///
/// Populated during startup and shared read-only afterwards.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Manufacturer, Arc<dyn LlmAdapter>>,
}

impl AdapterRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in adapters over one shared HTTP client
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn with_default_adapters(settings: &LlmSettings) -> AppResult<Self> {
        let transport = HttpTransport::new(UpstreamTimeouts::from(settings))?;
        let mut registry = Self::new();
        registry.register(Arc::new(OpenAiAdapter::new(transport.clone())));
        registry.register(Arc::new(AnthropicAdapter::new(transport)));
        info!(manufacturers = ?registry.manufacturers(), "LLM adapters registered");
        Ok(registry)
    }

    /// Register an adapter under the manufacturer it reports, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn LlmAdapter>) {
        self.adapters.insert(adapter.manufacturer(), adapter);
    }

    /// Look up the adapter for a catalog manufacturer identifier
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredManufacturer` for unknown identifiers or known
    /// manufacturers without a registered adapter
    pub fn get(&self, manufacturer: &str) -> AppResult<Arc<dyn LlmAdapter>> {
        let key: Manufacturer = manufacturer.parse()?;
        self.adapters
            .get(&key)
            .cloned()
            .ok_or_else(|| AppError::unregistered_manufacturer(manufacturer))
    }

    /// Manufacturers with a registered adapter
    #[must_use]
    pub fn manufacturers(&self) -> Vec<Manufacturer> {
        let mut list: Vec<_> = self.adapters.keys().copied().collect();
        list.sort_by_key(|m| m.as_str());
        list
    }
}
