//! Run ingestion and the HTTP surface until interrupted

use anyhow::Context;
use clap::Args;
use playback_api::ApiState;
use playback_config::{ObservabilityConfig, ServiceConfig};
use processor::{EngineMetrics, EventIngestor, FileCheckpointStore, KafkaLogClient, MetricsRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Args, Debug, Clone)]
pub struct ServeCommand {
    /// YAML configuration file; `PLAYBACK_*` variables override it
    #[arg(short, long, value_name = "FILE", env = "PLAYBACK_CONFIG")]
    pub config: Option<PathBuf>,
}

impl ServeCommand {
    pub async fn execute(self, init_tracing: fn(&ObservabilityConfig)) -> anyhow::Result<()> {
        let config = ServiceConfig::load(self.config).context("failed to load configuration")?;
        init_tracing(&config.observability);
        info!(service = %config.service.name, topic = %config.kafka.topic, "Starting service");

        let registry = MetricsRegistry::global();
        let metrics = EngineMetrics::register(&registry);
        let checkpoint = &config.processor.checkpoint;
        let checkpoints = Arc::new(FileCheckpointStore::new(&checkpoint.directory, checkpoint.retention));
        let log = KafkaLogClient::new(&config.kafka).context("failed to create Kafka consumer")?;

        let mut ingestor = EventIngestor::new(&config.processor, log, checkpoints, metrics)?;
        // a corrupt latest checkpoint stops startup here
        match ingestor.recover().await.context("checkpoint recovery failed")? {
            Some(recovered) => info!(
                seq = recovered.seq,
                partitions = recovered.offsets.len(),
                "Recovered from checkpoint"
            ),
            None => info!("No checkpoint found, starting from empty state"),
        }

        let state = ApiState::new(ingestor.query(), ingestor.broker(), registry);
        let addr = config.bind_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut ingestion = tokio::spawn(async move { ingestor.run(shutdown_rx).await });

        let mut server_shutdown = shutdown_tx.subscribe();
        let server = tokio::spawn(playback_api::serve(addr, state.clone(), async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        }));
        state.set_ready(true);

        // ingestion only returns on its own after a fatal error
        let finished_early = tokio::select! {
            _ = tokio::signal::ctrl_c() => None,
            finished = &mut ingestion => Some(finished),
        };
        let _ = shutdown_tx.send(true);
        let outcome = match finished_early {
            Some(finished) => finished,
            None => {
                info!("Shutdown signal received");
                ingestion.await
            }
        };
        state.set_ready(false);

        let ingestion_result = outcome.context("ingestion task panicked")?;
        server.await.context("HTTP server task panicked")??;

        if let Err(e) = ingestion_result {
            error!(error = %e, "Ingestion stopped with error");
            return Err(e.into());
        }
        info!("Shutdown complete");
        Ok(())
    }
}
