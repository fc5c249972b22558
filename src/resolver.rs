// ABOUTME: Model resolver selecting one usable model/provider chain for a requested model name
// ABOUTME: Applies the oldest-link-first tie-break when several providers serve the same model
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Model Resolution
//!
//! A model is usable when the model row, at least one link, and that link's
//! provider are all enabled. When several usable links exist the oldest link
//! wins (`created_at`, then link id), so the choice is stable across restarts
//! and never depends on query plans.

use tracing::{debug, instrument};

use crate::database::{CatalogManager, ModelRecord, ProviderRecord};
use crate::errors::{AppError, AppResult};

/// A resolved chain: the model and the provider that will serve it
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    /// Catalog model row
    pub model: ModelRecord,
    /// Provider whose credentials are used for the call
    pub provider: ProviderRecord,
}

impl ResolvedModel {
    /// Base URL the provider configured for this model's manufacturer, if any
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.provider.base_url_for(&self.model.manufacturer)
    }
}

/// Read-only resolver over the model catalog
#[derive(Clone)]
pub struct ModelResolver {
    catalog: CatalogManager,
}

impl ModelResolver {
    /// Create a resolver over the catalog
    #[must_use]
    pub const fn new(catalog: CatalogManager) -> Self {
        Self { catalog }
    }

    /// Resolve a model name to one usable `(model, provider)` chain
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` when no enabled chain exists, or a database
    /// error if the catalog cannot be read
    #[instrument(skip(self))]
    pub async fn resolve(&self, model_name: &str) -> AppResult<ResolvedModel> {
        let mut chains = self.catalog.usable_chains(model_name).await?;
        debug!(candidates = chains.len(), "Resolving model");

        if chains.is_empty() {
            return Err(AppError::model_unavailable(model_name));
        }

        let (model, provider) = chains.swap_remove(0);
        debug!(
            provider = %provider.name,
            manufacturer = %model.manufacturer,
            "Model resolved"
        );
        Ok(ResolvedModel { model, provider })
    }
}
