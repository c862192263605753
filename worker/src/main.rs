// ==============================================================================
// main.rs - Submission Worker Process
// ==============================================================================
// Description: Background worker that de-identifies sequencing files from the
//              staging bucket and submits them to the external repository
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-10-19
// Version: 2.0.0
// ==============================================================================

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::Client as RedisClient;
use std::sync::Arc;
use submission_processor::metadata::XmllintValidator;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod error;
mod job;
mod job_processor;
mod notifier;
mod queue;
mod storage;
mod uploader;

use config::{provision_transfer_keys, WorkerConfig};
use job_processor::Worker;
use notifier::HttpCompletionNotifier;
use queue::RedisJobQueue;
use storage::S3ObjectStore;

const DEFAULT_LOG_FILTER: &str = "submission_worker=info,submission_processor=info,audit=info";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    // LOG_FORMAT=json for log shipping
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();
    info!("Starting Submission Worker v{}", env!("CARGO_PKG_VERSION"));

    let config = WorkerConfig::from_env()?;
    info!(
        "Worker {} on queue {} ({:?} mode)",
        config.worker_id,
        config.queue_name,
        config.upload_mode()
    );

    provision_transfer_keys(&config).context("Failed to provision transfer keys")?;

    std::fs::create_dir_all(&config.scratch_root)
        .with_context(|| format!("Scratch root {:?} is not usable", config.scratch_root))?;

    // Initialize Redis connection
    let redis_client = RedisClient::open(config.redis_url.as_str())
        .context("Failed to create Redis client")?;

    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("Failed to create Redis connection manager")?;

    info!("Connected to Redis");

    let queue = RedisJobQueue::new(redis_conn, &config.queue_name, &config.worker_id);
    let store = S3ObjectStore::from_env().await;
    let notifier = HttpCompletionNotifier::new(&config);
    let validator = Arc::new(XmllintValidator::new(config.xmllint_bin.clone()));

    let mut worker = Worker::new(config, queue, store, notifier, validator);

    // Recover messages left in flight by a previous worker instance
    info!("Checking for in-flight messages from a previous run...");
    if let Err(e) = worker.recover().await {
        error!("Failed to recover in-flight messages: {:#}", e);
    }

    info!("Worker ready, waiting for jobs...");
    worker.run().await
}
