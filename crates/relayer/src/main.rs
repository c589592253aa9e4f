use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use xchain_relayer::{
    evm,
    logging::{self, LogFormat},
    BlockStore, DomainAllowList, PayloadShape, RelayerApp, RelayerConfig,
    TracingMetrics,
};

const CONFIG_ENVVAR: &str = "RELAYER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(LogFormat::from_env());

    let config_path =
        std::env::var(CONFIG_ENVVAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = RelayerConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    info!(path = %config_path, chains = config.chains.len(), "Loaded relayer config");

    let store = BlockStore::open(&config.store_path)
        .with_context(|| format!("Failed to open block store at {}", config.store_path.display()))?;
    let metrics = Arc::new(TracingMetrics::default());

    let mut chains = Vec::with_capacity(config.chains.len());
    for chain in &config.chains {
        let registered = evm::build_chain(chain, store.clone(), metrics.clone())
            .with_context(|| format!("Failed to set up chain {}", chain.name))?;
        chains.push(registered);
    }

    let app = RelayerApp::new(chains, metrics.clone(), config.dispatch_config())
        .with_processor(Arc::new(DomainAllowList::new(config.domain_ids())))
        .with_processor(Arc::new(PayloadShape));

    let cancel = CancellationToken::new();
    let (sys_tx, mut sys_rx) = mpsc::unbounded_channel();
    let mut relayer = tokio::spawn(app.start(cancel.clone(), sys_tx));

    let finished = tokio::select! {
        Some(err) = sys_rx.recv() => {
            error!(error = %err, "Relayer failed, shutting down");
            false
        }
        res = tokio::signal::ctrl_c() => {
            match res {
                Ok(()) => info!("Received interrupt, shutting down"),
                Err(e) => error!(error = %e, "Failed to listen for interrupt, shutting down"),
            }
            false
        }
        res = &mut relayer => {
            if let Err(e) = res {
                error!(error = %e, "Relayer task panicked");
            }
            true
        }
    };

    cancel.cancel();
    if !finished {
        if let Err(e) = relayer.await {
            error!(error = %e, "Relayer task panicked");
        }
    }

    let counters = metrics.snapshot();
    info!(
        deposits = counters.deposits,
        executions = counters.executions,
        execution_errors = counters.execution_errors,
        "Relayer stopped"
    );

    Ok(())
}
