use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod models;
mod services;

use config::{AppConfig, StoreBackend};
use services::{
    batch::BatchService,
    codec::JpegCodec,
    local_store::LocalObjectStore,
    object_store::ObjectStore,
    processor::Processor,
    s3_store::S3ObjectStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Load .env (optional) + parse config ---
    if let Err(err) = dotenvy::dotenv() {
        tracing::debug!("no .env file loaded: {}", err);
    }
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!("Starting image-optimizer with config: {:?}", cfg);

    // --- Connect to the object store ---
    let store: Arc<dyn ObjectStore> = match &cfg.backend {
        StoreBackend::S3(settings) => Arc::new(
            S3ObjectStore::connect(settings)
                .await
                .context("creating connection with S3 client")?,
        ),
        StoreBackend::Local(root) => {
            tracing::info!("Using local directory {} as bucket", root.display());
            Arc::new(LocalObjectStore::new(root.clone()))
        }
    };

    // --- Run the batch once ---
    let processor = Processor::new(Arc::clone(&store), Arc::new(JpegCodec), cfg.processor);
    let report = BatchService::new(store, processor, cfg.prefix)
        .with_max_concurrency(cfg.max_concurrency)
        .run()
        .await
        .context("could not get objects from the store")?;

    tracing::info!(
        listed = report.listed,
        dispatched = report.dispatched,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        over_budget = report.over_budget().count(),
        bytes_saved = report.bytes_saved(),
        "Image processing completed"
    );

    Ok(())
}
