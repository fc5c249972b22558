// ABOUTME: Health check route handlers for service monitoring
// ABOUTME: Reports liveness and whether the chat store answers queries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::warn;

use crate::constants::endpoints;
use crate::server::ServerResources;

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create all health check routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(endpoints::HEALTH_CHECK, get(Self::health))
            .with_state(resources)
    }

    async fn health(State(resources): State<Arc<ServerResources>>) -> (StatusCode, Json<Value>) {
        let database = sqlx::query("SELECT 1")
            .execute(resources.database.pool())
            .await;

        let (status, label) = match database {
            Ok(_) => (StatusCode::OK, "healthy"),
            Err(e) => {
                warn!(error = %e, "Health check database probe failed");
                (StatusCode::SERVICE_UNAVAILABLE, "degraded")
            }
        };

        (
            status,
            Json(json!({
                "status": label,
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339()
            })),
        )
    }
}
