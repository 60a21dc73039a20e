//! Portage Server
//!
//! HTTP conversion service: accepts zipped function packages, drives the
//! compiled conversion pipeline over them one at a time, and serves the
//! converted artifacts back as zips.

mod api;
mod config;
mod service;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::service::{build_engine, run_worker, AppState, Store, QUEUE_CAPACITY};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portage_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting portage conversion service");

    let config = Config::from_env();
    info!("Listening on {}", config.bind_addr);

    let engine = build_engine(&config.pipeline_document, &config.env_options)
        .context("Failed to compile the startup pipeline")?;
    let engine = Arc::new(RwLock::new(Arc::new(engine)));
    let store = Arc::new(RwLock::new(Store::default()));

    let (queue, requests) = mpsc::channel(QUEUE_CAPACITY);
    tokio::spawn(run_worker(
        requests,
        Arc::clone(&store),
        Arc::clone(&engine),
        config.job_timeout,
    ));

    let state = AppState {
        queue,
        store,
        engine,
        env_options: config.env_options.clone(),
    };
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
