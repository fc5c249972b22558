// ABOUTME: Model catalog routes listing the models a chat request may name
// ABOUTME: Returns usable models grouped by manufacturer for the model picker
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, routing::get, Json, Router};
use serde::Serialize;

use crate::database::ManufacturerModels;
use crate::errors::AppError;
use crate::middleware::record_user_id;
use crate::server::ServerResources;

/// Response for `GET /api/models/available`
#[derive(Debug, Serialize)]
pub struct AvailableModelsResponse {
    /// Usable models grouped by manufacturer
    pub manufacturers: Vec<ManufacturerModels>,
}

/// Model catalog routes
pub struct ModelRoutes;

impl ModelRoutes {
    /// Create the model catalog routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/models/available", get(Self::available_models))
            .with_state(resources)
    }

    async fn available_models(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Json<AvailableModelsResponse>, AppError> {
        let user = resources.verifier.authenticate(&headers)?;
        record_user_id(&user.user_id);

        let manufacturers = resources.database.catalog().available_models().await?;
        Ok(Json(AvailableModelsResponse { manufacturers }))
    }
}
