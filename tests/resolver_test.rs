// ABOUTME: Integration tests for model resolution against the catalog
// ABOUTME: Verifies enablement rules, oldest-link tie-break, and base URL lookup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::{create_test_database, seed_model};
use converse_server::{
    database::{NewProvider, ProviderRecord},
    errors::{ErrorClass, ErrorCode},
    resolver::ModelResolver,
};

async fn second_provider(
    database: &converse_server::database::Database,
    name: &str,
    base_url: Option<&str>,
) -> ProviderRecord {
    let base_url_map: HashMap<String, String> = base_url
        .map(|url| HashMap::from([("openai".to_owned(), url.to_owned())]))
        .unwrap_or_default();
    database
        .catalog()
        .create_provider(NewProvider {
            name,
            api_key: "sk-second",
            base_url_map,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_resolves_enabled_chain() {
    let database = create_test_database().await.unwrap();
    let (model, provider) = seed_model(&database, "gpt-test", "openai", "primary")
        .await
        .unwrap();

    let resolved = ModelResolver::new(database.catalog())
        .resolve("gpt-test")
        .await
        .unwrap();
    assert_eq!(resolved.model.id, model.id);
    assert_eq!(resolved.provider.id, provider.id);
    assert_eq!(resolved.provider.api_key, "sk-test");
    assert_eq!(resolved.base_url(), None);
}

#[tokio::test]
async fn test_unknown_model_is_request_error() {
    let database = create_test_database().await.unwrap();
    let error = ModelResolver::new(database.catalog())
        .resolve("nope")
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::ResourceNotFound);
    assert_eq!(error.class(), ErrorClass::RequestError);
}

#[tokio::test]
async fn test_any_disabled_element_breaks_the_chain() {
    let database = create_test_database().await.unwrap();
    let (model, provider) = seed_model(&database, "gpt-test", "openai", "primary")
        .await
        .unwrap();
    let catalog = database.catalog();
    let resolver = ModelResolver::new(catalog.clone());

    catalog.set_provider_enabled(&provider.id, false).await.unwrap();
    assert!(resolver.resolve("gpt-test").await.is_err());
    catalog.set_provider_enabled(&provider.id, true).await.unwrap();
    assert!(resolver.resolve("gpt-test").await.is_ok());

    catalog.set_model_enabled(&model.id, false).await.unwrap();
    assert!(resolver.resolve("gpt-test").await.is_err());
    catalog.set_model_enabled(&model.id, true).await.unwrap();

    let link_id: String =
        sqlx::query_scalar("SELECT id FROM model_provider_links WHERE model_id = $1")
            .bind(&model.id)
            .fetch_one(database.pool())
            .await
            .unwrap();
    catalog.set_link_enabled(&link_id, false).await.unwrap();
    assert!(resolver.resolve("gpt-test").await.is_err());
    assert!(catalog.available_models().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_oldest_link_wins_and_disabled_links_fall_through() {
    let database = create_test_database().await.unwrap();
    let (model, primary) = seed_model(&database, "gpt-test", "openai", "primary")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let backup = second_provider(&database, "backup", Some("https://proxy.example.com/v1")).await;
    let catalog = database.catalog();
    let backup_link = catalog.link_model(&model.id, &backup.id).await.unwrap();
    let resolver = ModelResolver::new(catalog.clone());

    for _ in 0..3 {
        assert_eq!(resolver.resolve("gpt-test").await.unwrap().provider.id, primary.id);
    }

    catalog.set_provider_enabled(&primary.id, false).await.unwrap();
    let resolved = resolver.resolve("gpt-test").await.unwrap();
    assert_eq!(resolved.provider.id, backup.id);
    assert_eq!(resolved.base_url(), Some("https://proxy.example.com/v1"));

    catalog.set_link_enabled(&backup_link.id, false).await.unwrap();
    assert!(resolver.resolve("gpt-test").await.is_err());
}

#[tokio::test]
async fn test_available_models_grouped_by_manufacturer() {
    let database = create_test_database().await.unwrap();
    seed_model(&database, "gpt-test", "openai", "primary").await.unwrap();
    seed_model(&database, "claude-test", "anthropic", "secondary")
        .await
        .unwrap();

    let groups = database.catalog().available_models().await.unwrap();
    let manufacturers: Vec<&str> = groups.iter().map(|g| g.manufacturer.as_str()).collect();
    assert_eq!(manufacturers, vec!["anthropic", "openai"]);
    assert_eq!(groups[1].models[0].name, "gpt-test");
}
