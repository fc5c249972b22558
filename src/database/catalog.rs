// ABOUTME: Database operations for the model catalog: providers, models, and their links
// ABOUTME: Seeding helpers, enable switches, usable-chain lookup, and the available-model listing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::now_timestamp;
use crate::errors::{AppError, AppResult};

// ============================================================================
// Database Record Types
// ============================================================================

/// An upstream account: credentials plus per-manufacturer endpoints
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Unique provider ID
    pub id: String,
    /// Unique provider name
    pub name: String,
    /// API key sent upstream
    pub api_key: String,
    /// Manufacturer identifier to base URL
    pub base_url_map: HashMap<String, String>,
    /// Whether the provider may serve requests
    pub is_enabled: bool,
    /// When the provider was created (RFC 3339)
    pub created_at: String,
}

impl ProviderRecord {
    /// Base URL this provider uses for a manufacturer, if configured
    #[must_use]
    pub fn base_url_for(&self, manufacturer: &str) -> Option<&str> {
        self.base_url_map.get(manufacturer).map(String::as_str)
    }
}

impl fmt::Debug for ProviderRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api_key", &"[REDACTED]")
            .field("base_url_map", &self.base_url_map)
            .field("is_enabled", &self.is_enabled)
            .finish_non_exhaustive()
    }
}

/// A model known to the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Unique model ID
    pub id: String,
    /// Manufacturer-scoped model name sent upstream
    pub name: String,
    /// Human-readable name
    pub display_name: String,
    /// Manufacturer identifier (selects the adapter)
    pub manufacturer: String,
    /// Whether the model may be used
    pub is_enabled: bool,
    /// When the model was created (RFC 3339)
    pub created_at: String,
}

/// Many-to-many association between a model and a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Unique link ID
    pub id: String,
    /// Linked model
    pub model_id: String,
    /// Linked provider
    pub provider_id: String,
    /// Whether this link may be used
    pub is_enabled: bool,
    /// When the link was created (RFC 3339)
    pub created_at: String,
}

/// Fields for a provider insert
#[derive(Debug, Clone)]
pub struct NewProvider<'a> {
    /// Unique provider name
    pub name: &'a str,
    /// API key sent upstream
    pub api_key: &'a str,
    /// Manufacturer identifier to base URL
    pub base_url_map: HashMap<String, String>,
}

/// Fields for a model insert
#[derive(Debug, Clone)]
pub struct NewModel<'a> {
    /// Manufacturer-scoped model name
    pub name: &'a str,
    /// Human-readable name
    pub display_name: &'a str,
    /// Manufacturer identifier
    pub manufacturer: &'a str,
}

/// A usable model as shown to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableModel {
    /// Name to send in chat requests
    pub name: String,
    /// Human-readable name
    pub display_name: String,
}

/// Usable models of one manufacturer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturerModels {
    /// Manufacturer identifier
    pub manufacturer: String,
    /// Models ordered by display name
    pub models: Vec<AvailableModel>,
}

fn provider_from_row(r: &SqliteRow, prefix: &str) -> AppResult<ProviderRecord> {
    let col = |name: &str| format!("{prefix}{name}");
    let base_url_map: String = r.try_get(col("base_url_map").as_str())?;
    Ok(ProviderRecord {
        id: r.try_get(col("id").as_str())?,
        name: r.try_get(col("name").as_str())?,
        api_key: r.try_get(col("api_key").as_str())?,
        base_url_map: serde_json::from_str(&base_url_map)?,
        is_enabled: r.try_get(col("is_enabled").as_str())?,
        created_at: r.try_get(col("created_at").as_str())?,
    })
}

fn model_from_row(r: &SqliteRow, prefix: &str) -> AppResult<ModelRecord> {
    let col = |name: &str| format!("{prefix}{name}");
    Ok(ModelRecord {
        id: r.try_get(col("id").as_str())?,
        name: r.try_get(col("name").as_str())?,
        display_name: r.try_get(col("display_name").as_str())?,
        manufacturer: r.try_get(col("manufacturer").as_str())?,
        is_enabled: r.try_get(col("is_enabled").as_str())?,
        created_at: r.try_get(col("created_at").as_str())?,
    })
}

// ============================================================================
// Catalog Manager
// ============================================================================

/// Catalog database operations manager
#[derive(Clone)]
pub struct CatalogManager {
    pool: SqlitePool,
}

impl CatalogManager {
    /// Create a new catalog manager
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an enabled provider
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or the insert fails
    pub async fn create_provider(&self, provider: NewProvider<'_>) -> AppResult<ProviderRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        let base_url_map = serde_json::to_string(&provider.base_url_map)?;

        sqlx::query(
            r"
            INSERT INTO providers (id, name, api_key, base_url_map, is_enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 1, $5, $5)
            ",
        )
        .bind(&id)
        .bind(provider.name)
        .bind(provider.api_key)
        .bind(&base_url_map)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create provider: {e}")))?;

        Ok(ProviderRecord {
            id,
            name: provider.name.to_owned(),
            api_key: provider.api_key.to_owned(),
            base_url_map: provider.base_url_map,
            is_enabled: true,
            created_at: now,
        })
    }

    /// Create an enabled model
    ///
    /// # Errors
    ///
    /// Returns an error if the name is taken or the insert fails
    pub async fn create_model(&self, model: NewModel<'_>) -> AppResult<ModelRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();

        sqlx::query(
            r"
            INSERT INTO models (id, name, display_name, manufacturer, is_enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 1, $5, $5)
            ",
        )
        .bind(&id)
        .bind(model.name)
        .bind(model.display_name)
        .bind(model.manufacturer)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create model: {e}")))?;

        Ok(ModelRecord {
            id,
            name: model.name.to_owned(),
            display_name: model.display_name.to_owned(),
            manufacturer: model.manufacturer.to_owned(),
            is_enabled: true,
            created_at: now,
        })
    }

    /// Link a model to a provider (enabled)
    ///
    /// # Errors
    ///
    /// Returns an error if the pair is already linked or either side is missing
    pub async fn link_model(&self, model_id: &str, provider_id: &str) -> AppResult<LinkRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();

        sqlx::query(
            r"
            INSERT INTO model_provider_links (id, model_id, provider_id, is_enabled, created_at, updated_at)
            VALUES ($1, $2, $3, 1, $4, $4)
            ",
        )
        .bind(&id)
        .bind(model_id)
        .bind(provider_id)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to link model to provider: {e}")))?;

        Ok(LinkRecord {
            id,
            model_id: model_id.to_owned(),
            provider_id: provider_id.to_owned(),
            is_enabled: true,
            created_at: now,
        })
    }

    /// Enable or disable a provider
    ///
    /// # Errors
    ///
    /// Returns an error if the provider does not exist
    pub async fn set_provider_enabled(&self, provider_id: &str, enabled: bool) -> AppResult<()> {
        self.set_enabled("providers", "Provider", provider_id, enabled)
            .await
    }

    /// Enable or disable a model
    ///
    /// # Errors
    ///
    /// Returns an error if the model does not exist
    pub async fn set_model_enabled(&self, model_id: &str, enabled: bool) -> AppResult<()> {
        self.set_enabled("models", "Model", model_id, enabled).await
    }

    /// Enable or disable a model/provider link
    ///
    /// # Errors
    ///
    /// Returns an error if the link does not exist
    pub async fn set_link_enabled(&self, link_id: &str, enabled: bool) -> AppResult<()> {
        self.set_enabled("model_provider_links", "Link", link_id, enabled)
            .await
    }

    async fn set_enabled(
        &self,
        table: &'static str,
        label: &str,
        id: &str,
        enabled: bool,
    ) -> AppResult<()> {
        let result = sqlx::query(&format!(
            "UPDATE {table} SET is_enabled = $1, updated_at = $2 WHERE id = $3"
        ))
        .bind(enabled)
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update {label}: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("{label} {id}")));
        }
        Ok(())
    }

    /// Every usable `(model, provider)` chain for a model name
    ///
    /// A chain is usable when the model, the link, and the provider are all
    /// enabled. Chains are ordered oldest link first, with the link id as a
    /// final tie-break, so callers can pick deterministically.
    ///
    /// # Errors
    ///
    /// Returns an error if database operation fails
    pub async fn usable_chains(
        &self,
        model_name: &str,
    ) -> AppResult<Vec<(ModelRecord, ProviderRecord)>> {
        let rows = sqlx::query(
            r"
            SELECT m.id AS m_id, m.name AS m_name, m.display_name AS m_display_name,
                   m.manufacturer AS m_manufacturer, m.is_enabled AS m_is_enabled,
                   m.created_at AS m_created_at,
                   p.id AS p_id, p.name AS p_name, p.api_key AS p_api_key,
                   p.base_url_map AS p_base_url_map, p.is_enabled AS p_is_enabled,
                   p.created_at AS p_created_at
            FROM model_provider_links l
            JOIN models m ON m.id = l.model_id
            JOIN providers p ON p.id = l.provider_id
            WHERE m.name = $1 AND m.is_enabled = 1 AND l.is_enabled = 1 AND p.is_enabled = 1
            ORDER BY l.created_at ASC, l.id ASC
            ",
        )
        .bind(model_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to resolve model chains: {e}")))?;

        rows.iter()
            .map(|r| Ok((model_from_row(r, "m_")?, provider_from_row(r, "p_")?)))
            .collect()
    }

    /// Usable models grouped by manufacturer
    ///
    /// Groups are ordered by manufacturer and models by display name. A model
    /// reachable through several providers appears once.
    ///
    /// # Errors
    ///
    /// Returns an error if database operation fails
    pub async fn available_models(&self) -> AppResult<Vec<ManufacturerModels>> {
        let rows = sqlx::query(
            r"
            SELECT DISTINCT m.manufacturer, m.name, m.display_name
            FROM models m
            JOIN model_provider_links l ON l.model_id = m.id
            JOIN providers p ON p.id = l.provider_id
            WHERE m.is_enabled = 1 AND l.is_enabled = 1 AND p.is_enabled = 1
            ORDER BY m.manufacturer ASC, m.display_name ASC, m.name ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list available models: {e}")))?;

        let mut groups: Vec<ManufacturerModels> = Vec::new();
        for r in &rows {
            let manufacturer: String = r.try_get("manufacturer")?;
            let model = AvailableModel {
                name: r.try_get("name")?,
                display_name: r.try_get("display_name")?,
            };
            match groups.last_mut() {
                Some(group) if group.manufacturer == manufacturer => group.models.push(model),
                _ => groups.push(ManufacturerModels {
                    manufacturer,
                    models: vec![model],
                }),
            }
        }
        Ok(groups)
    }
}
