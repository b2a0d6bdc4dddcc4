use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::ExposeSecret;
use tracing::{info, warn};

use wallet_jobs::api::create_router_with_rate_limit;
use wallet_jobs::app::{
    AppState, ChainClients, JobProcessor, JobService, MultiSigCoordinator, Notifiers, TaskRunner,
    TransactionSender, spawn_worker,
};
use wallet_jobs::config::AppConfig;
use wallet_jobs::domain::{Network, TransactionSigner};
use wallet_jobs::infra::observability::{init_metrics, init_tracing};
use wallet_jobs::infra::{EvmRpcClient, HttpNotifier, LocalSigner, PostgresClient, PostgresConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;
    init_tracing(config.log_json).context("failed to install tracing subscriber")?;
    let metrics = Arc::new(init_metrics().context("failed to install metrics recorder")?);

    let db = Arc::new(
        PostgresClient::new(config.database_url.expose_secret(), PostgresConfig::default())
            .await?,
    );
    db.run_migrations().await?;

    let relayer: Arc<dyn TransactionSigner> =
        Arc::new(LocalSigner::new(config.signer_private_key.clone())?);
    info!(address = %relayer.address(), "Relayer account loaded");

    let home = Arc::new(EvmRpcClient::new(
        Network::Home,
        config.home.rpc_urls.clone(),
        Arc::clone(&relayer),
        config.home.rpc_config(config.rpc_timeout),
    )?);
    let foreign = Arc::new(EvmRpcClient::new(
        Network::Foreign,
        config.foreign.rpc_urls.clone(),
        Arc::clone(&relayer),
        config.foreign.rpc_config(config.rpc_timeout),
    )?);
    let chains = ChainClients::new(home, foreign);

    let cosigners = config
        .multisig_signer_keys
        .iter()
        .map(|key| Ok(Arc::new(LocalSigner::new(key.clone())?) as Arc<dyn TransactionSigner>))
        .collect::<Result<Vec<_>>>()?;
    let multisig = MultiSigCoordinator::new(cosigners, config.multisig_threshold)?;
    info!(
        signers = ?multisig.signer_addresses(),
        threshold = multisig.threshold(),
        "Multi-sig co-signers loaded"
    );

    let notifier = Arc::new(HttpNotifier::new(config.notifier.clone())?);
    let notifiers = Notifiers {
        deep_links: notifier.clone(),
        sms: notifier.clone(),
        subscriber: notifier,
    };

    let tasks = Arc::new(TaskRunner::new(
        TransactionSender::new(chains.clone(), config.receipt_timeout),
        multisig,
        db.clone(),
        db.clone(),
        notifiers,
        config.tasks.clone(),
    ));
    let processor = JobProcessor::new(tasks, db.clone(), config.processor.clone());
    let (worker_handle, worker_shutdown) = spawn_worker(processor, config.worker.clone());

    let service = Arc::new(JobService::new(db, chains, config.max_attempts));
    let state = Arc::new(AppState::new(
        service,
        config.api_auth_key.clone(),
        metrics,
    ));
    let router = create_router_with_rate_limit(state, config.rate_limit.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Server starting");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped, waiting for worker");
    let _ = worker_shutdown.send(true);
    if let Err(e) = worker_handle.await {
        warn!(error = %e, "Worker task ended abnormally");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
