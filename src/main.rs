use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use secom_mms_gateway::app::{IngestSettings, IngestUseCase, OutboundClientPool};
use secom_mms_gateway::config::GatewayConfig;
use secom_mms_gateway::error::GatewayError;
use secom_mms_gateway::infra::certificate;
use secom_mms_gateway::infra::keystore::Keystore;
use secom_mms_gateway::infra::secom_client::HttpSecomClientFactory;
use secom_mms_gateway::infra::signer::KeystoreSigner;
use secom_mms_gateway::infra::subscription_store::SqliteSubscriptionStore;
use secom_mms_gateway::infra::ws_dialer::{client_tls_config, WebSocketDialer};
use secom_mms_gateway::mmtp::{SessionSettings, TransportSession};
use secom_mms_gateway::observability::{init_logging, init_metrics};
use secom_mms_gateway::server::{run_gateway, AppState};

#[derive(Parser)]
#[command(name = "secom_mms_gateway")]
#[command(about = "Republishes SECOM uploads onto the Maritime Messaging Service")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway: HTTP interface plus the edge router session
    Serve,
    /// Print the MRN a certificate resolves to
    Identity {
        /// Certificate file (PEM, DER or base64)
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Identity { path } => {
            let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let mrn = certificate::resolve_identity(&bytes)?;
            println!("{mrn}");
            Ok(())
        }
        Commands::Serve => serve(cli.config).await,
    }
}

async fn serve(config_path: PathBuf) -> anyhow::Result<()> {
    let config = GatewayConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    // Flushes the log file when dropped.
    let _guard = init_logging(&config.logging.directory);
    init_metrics(config.metrics.listen).context("installing metrics recorder")?;

    let keystore = Arc::new(Keystore::from_config(&config.keystore));
    let mms_signer = Arc::new(KeystoreSigner::new(
        keystore.clone(),
        config.mmtp.signature_algorithm,
        &config.mmtp.key_alias,
    ));
    let secom_signer = Arc::new(KeystoreSigner::new(
        keystore.clone(),
        config.secom.signature_algorithm,
        &config.secom.key_alias,
    ));

    let store = Arc::new(SqliteSubscriptionStore::open(&config.registry.database)?);
    let factory = Arc::new(HttpSecomClientFactory::new(
        keystore.clone(),
        &config.secom.key_alias,
        secom_signer.clone(),
        secom_signer,
        Duration::from_secs(config.secom.request_timeout_secs),
    ));
    let pool = Arc::new(OutboundClientPool::new(store, factory));

    let tls = client_tls_config(&keystore, &config.mmtp.key_alias, config.mmtp.trust_anchor.as_deref())?;
    let dialer = Arc::new(WebSocketDialer::new(&config.mmtp.edge_router_url, tls));
    let session = Arc::new(TransportSession::new(SessionSettings::from(&config.mmtp), dialer));
    session
        .start()
        .await
        .context("connecting to the edge router")?;

    let ingest = Arc::new(IngestUseCase::new(
        pool.clone(),
        session.clone(),
        mms_signer,
        IngestSettings::from(&config),
    ));
    let state = Arc::new(AppState {
        ingest,
        pool: pool.clone(),
        data_product_type: config.secom.data_product_type,
    });

    info!(bind = %config.server.bind, own_mrn = %config.mmtp.own_mrn, "Gateway starting");
    match run_gateway(state, config.server.bind, shutdown_signal(), session.clone()).await {
        Ok(()) => {}
        Err(e @ GatewayError::EdgeRouterLost(_)) => {
            error!(error = %e, "Giving up on the edge router; exiting");
            return Err(e.into());
        }
        Err(e) => error!(error = %e, "HTTP server failed"),
    }

    if config.secom.unsubscribe_on_shutdown {
        let removed = pool.unsubscribe_all().await;
        info!(removed, "Removed subscriptions before shutdown");
    }
    session.shutdown().await;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
