//! Chat application composition.
//!
//! Wires the training corpus, the Gemini backend and the BigQuery connection
//! into a [`ChatEngine`], puts the HTTP front-end on top and serves it. The
//! server runs until the process is terminated.

mod engine;
mod llm;
mod server;
mod store;
mod ui;
mod warehouse;

pub use engine::ChatEngine;
pub use llm::{GeminiChat, GeminiConfig, TEMPERATURE};
pub use server::{create_router, AppState};
pub use store::LocalVectorStore;
pub use ui::UiSettings;
pub use warehouse::BigQueryConnection;

use crate::config::AppConfig;
use crate::runner::SystemRunner;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Default mount point of the storage bucket holding the corpus.
pub const DEFAULT_DATA_PATH: &str = "/chroma_data";

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub data_path: PathBuf,
}

pub fn build_state(config: &AppConfig, options: &ServeOptions) -> Result<AppState> {
    let store = LocalVectorStore::open(&options.data_path).context("failed to open training corpus")?;
    let llm = GeminiChat::new(GeminiConfig {
        api_key: config.api_key.clone(),
        model: config.project.model.clone(),
        language: config.project.language.clone(),
        temperature: TEMPERATURE,
    });
    let warehouse = BigQueryConnection::new(
        &config.project.project_id,
        &config.bigquery.region_id,
        Arc::new(SystemRunner),
    );
    let engine = ChatEngine::new(Arc::new(store), Arc::new(llm), warehouse);
    let settings = UiSettings::from_personalization(&config.personalization);
    Ok(AppState::new(engine, settings))
}

pub async fn serve(config: &AppConfig, options: &ServeOptions) -> Result<()> {
    let state = Arc::new(build_state(config, options)?);
    if state.settings.debug {
        tracing::debug!(settings = ?state.settings, "front-end settings");
    }

    let addr: SocketAddr = format!("{}:{}", options.host, options.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", options.host, options.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        %addr,
        project_id = %config.project.project_id,
        model = %config.project.model,
        "chat server listening"
    );
    axum::serve(listener, create_router(state))
        .await
        .context("server error")
}
