// ABOUTME: Server resource container, router assembly, and the HTTP serve loop
// ABOUTME: Wires the store, adapters, token verifier, and middleware into one axum app
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Server
//!
//! [`ServerResources`] holds the shared state every route needs.
//! [`build_router`] merges the domain routers and applies request ids,
//! tracing, and CORS. [`run`] binds the listener and serves until Ctrl-C.

use std::sync::Arc;

use axum::Router;
use http::HeaderName;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use crate::auth::{JwtVerifier, TokenVerifier};
use crate::chat::{ChatService, ConversationLocks};
use crate::config::ServerConfig;
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::llm::AdapterRegistry;
use crate::middleware::{create_request_span, setup_cors, RequestIdMaker, REQUEST_ID_HEADER};
use crate::routes::{ChatRoutes, HealthRoutes, ModelRoutes};

/// Centralized resource container shared by all routes
#[derive(Clone)]
pub struct ServerResources {
    /// Chat store
    pub database: Database,
    /// Adapters keyed by manufacturer
    pub registry: Arc<AdapterRegistry>,
    /// Streaming chat orchestrator
    pub chat: ChatService,
    /// Bearer token verification
    pub verifier: Arc<dyn TokenVerifier>,
    /// Loaded configuration
    pub config: Arc<ServerConfig>,
}

impl ServerResources {
    /// Assemble resources from already-built collaborators
    #[must_use]
    pub fn new(
        database: Database,
        registry: Arc<AdapterRegistry>,
        verifier: Arc<dyn TokenVerifier>,
        config: Arc<ServerConfig>,
    ) -> Self {
        let chat = ChatService::new(
            database.clone(),
            Arc::clone(&registry),
            ConversationLocks::new(),
            config.llm.clone(),
        );
        Self {
            database,
            registry,
            chat,
            verifier,
            config,
        }
    }

    /// Open the database and build the default adapters from `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or an HTTP client
    /// cannot be built
    pub async fn from_config(config: ServerConfig) -> AppResult<Self> {
        let database = Database::new(&config.database).await?;
        let registry = AdapterRegistry::with_default_adapters(&config.llm)?;
        info!(manufacturers = ?registry.manufacturers(), "LLM adapters registered");

        let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(&config.auth.jwt_secret));
        Ok(Self::new(
            database,
            Arc::new(registry),
            verifier,
            Arc::new(config),
        ))
    }
}

/// Merge all routers and apply the HTTP middleware stack
pub fn build_router(resources: &Arc<ServerResources>) -> Router {
    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .merge(HealthRoutes::routes(Arc::clone(resources)))
        .merge(ModelRoutes::routes(Arc::clone(resources)))
        .merge(ChatRoutes::routes(Arc::clone(resources)))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    request_id_header.clone(),
                    RequestIdMaker,
                ))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(create_request_span)
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(PropagateRequestIdLayer::new(request_id_header)),
        )
        .layer(setup_cors(&resources.config))
}

/// Serve the API until Ctrl-C
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails
pub async fn run(resources: ServerResources) -> AppResult<()> {
    let bind_address = resources.config.bind_address();
    let resources = Arc::new(resources);
    let router = build_router(&resources);

    let listener = TcpListener::bind(&bind_address)
        .await
        .map_err(|e| AppError::config_invalid(format!("Failed to bind {bind_address}: {e}")))?;
    info!(address = %bind_address, "Chat server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::internal(format!("Server error: {e}")))?;

    info!("Chat server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}
