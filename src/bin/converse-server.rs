// ABOUTME: Chat server binary entry point
// ABOUTME: Loads configuration from the environment, initializes logging, and serves the API
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Converse Server Binary
//!
//! Streams chat turns from `OpenAI` and `Anthropic` models over server-sent
//! events and records every conversation in `SQLite`.

use anyhow::Result;
use clap::Parser;
use converse_server::{config::ServerConfig, logging, server};
use tracing::info;

#[derive(Parser)]
#[command(name = "converse-server")]
#[command(about = "Streaming multi-provider LLM chat server")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override bind host
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }

    logging::init_from_env()?;
    info!("{}", config.summary());

    let resources = server::ServerResources::from_config(config).await?;
    server::run(resources).await?;
    Ok(())
}
