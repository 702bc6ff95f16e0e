use anyhow::Result;

use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::{Config, OutputFormat};
use crate::services::{EmbeddingClient, MetricsStore, create_backend_with_embedding_config};

pub async fn handle_status(format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);

    let (embedding_healthy, embedding_model) = match EmbeddingClient::new(&config.embedding) {
        Ok(client) => match client.health_check().await {
            Ok(health) => (true, health.model_id),
            Err(e) => {
                tracing::debug!(error = %e, "embedding health check failed");
                (false, None)
            }
        },
        Err(_) => (false, None),
    };

    let (vector_store_connected, vector_store_points) =
        match create_backend_with_embedding_config(&config.vector_store, &config.embedding) {
            Ok(store) => {
                let connected = store.health_check().await.unwrap_or(false);
                let points = if connected {
                    store
                        .get_collection_info()
                        .await
                        .ok()
                        .flatten()
                        .map(|info| info.points_count)
                } else {
                    None
                };
                (connected, points)
            }
            Err(_) => (false, None),
        };

    let recent_runs = if config.metrics.enabled {
        Config::metrics_db_path()
            .filter(|path| path.exists())
            .and_then(|path| MetricsStore::open(&path).ok())
            .map(|store| store.get_summary(config.metrics.retention_days))
    } else {
        None
    };

    let status = StatusInfo {
        embedding_url: config.embedding.url.clone(),
        embedding_healthy,
        embedding_model,
        vector_store_url: config.vector_store.url.clone(),
        vector_store_connected,
        collection: config.vector_store.collection.clone(),
        vector_store_points,
        recent_runs,
        retention_days: config.metrics.retention_days,
    };

    print!("{}", formatter.format_status(&status));

    if !embedding_healthy || !vector_store_connected {
        eprintln!();
        if !embedding_healthy {
            eprintln!(
                "Warning: embedding server not reachable at {}",
                config.embedding.url
            );
        }
        if !vector_store_connected {
            eprintln!("Warning: Qdrant not running. Start with: docker-compose up -d qdrant");
        }
        if verbose {
            eprintln!("Hint: endpoints are set in `il2cpp-ingest config path`");
        }
    }

    Ok(())
}
