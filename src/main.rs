//! Teleport Oracle Node
//!
//! Runs the configured relay directions against an Antelope account chain
//! and an EVM chain until SIGINT/SIGTERM or a fatal error.

use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use teleport_oracle::antelope::{AntelopeClient, AntelopeKey};
use teleport_oracle::api::{self, OracleStatus, SharedStatus};
use teleport_oracle::checkpoint::CheckpointFile;
use teleport_oracle::config::{Config, Direction};
use teleport_oracle::driver::Driver;
use teleport_oracle::endpoints::EndpointPool;
use teleport_oracle::evm::EvmClient;
use teleport_oracle::finality::EvmFinality;
use teleport_oracle::relay::receipt::ReceiptSettings;
use teleport_oracle::relay::sign::SignSettings;
use teleport_oracle::relay::{ReceiptRelay, SignRelay};
use teleport_oracle::signer::AttestationSigner;
use teleport_oracle::OracleError;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting Teleport Oracle");

    let config = Config::load()?;
    info!(
        oracle = %config.antelope.oracle_account,
        antelope_endpoints = config.antelope.endpoints.len(),
        evm_endpoints = config.evm.endpoints.len(),
        evm_network = %config.evm.network,
        directions = ?config.relay.directions,
        dry_run = config.relay.dry_run,
        "Configuration loaded"
    );

    let status: SharedStatus = Arc::new(RwLock::new(OracleStatus {
        oracle: config.antelope.oracle_account.clone(),
        dry_run: config.relay.dry_run,
        ..Default::default()
    }));

    let api_status = status.clone();
    let bind = config.relay.api_bind_address.clone();
    let port = config.relay.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::start_server(&bind, port, api_status).await {
            error!(error = %e, "Health server failed");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = signal_tx.send(true);
    });

    let driver = Driver::default();
    let mut relays: JoinSet<(&'static str, teleport_oracle::Result<()>)> = JoinSet::new();

    if config.runs(Direction::Sign) {
        let relay = build_sign_relay(&config)?;
        let driver = driver.clone();
        let rx = shutdown_rx.clone();
        status.write().await.relay_started(Direction::Sign.as_str());
        relays.spawn(async move { ("sign", driver.run(relay, rx).await) });
    }

    if config.runs(Direction::Receipt) {
        let relay = build_receipt_relay(&config)?;
        let driver = driver.clone();
        let rx = shutdown_rx.clone();
        status.write().await.relay_started(Direction::Receipt.as_str());
        relays.spawn(async move { ("receipt", driver.run(relay, rx).await) });
    }

    let mut fatal: Option<OracleError> = None;
    while let Some(joined) = relays.join_next().await {
        match joined {
            Ok((name, Ok(()))) => {
                info!(relay = name, "Relay finished");
                status.write().await.relay_stopped(name, None);
            }
            Ok((name, Err(e))) => {
                error!(relay = name, error = %e, "Relay stopped with fatal error, shutting down");
                status.write().await.relay_stopped(name, Some(e.to_string()));
                let _ = shutdown_tx.send(true);
                fatal.get_or_insert(e);
            }
            Err(e) => {
                warn!(error = %e, "Relay task panicked");
                let _ = shutdown_tx.send(true);
            }
        }
    }

    info!("Teleport Oracle stopped");
    match fatal {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn antelope_pool(config: &Config) -> eyre::Result<EndpointPool<AntelopeClient>> {
    let key = AntelopeKey::parse(&config.antelope.private_key)?;
    let connector = AntelopeClient::connector(
        config.antelope.network_id.clone(),
        Some(Arc::new(key)),
        config.relay.request_timeout,
    );
    Ok(EndpointPool::new(
        "antelope",
        &config.antelope.network_id,
        &config.antelope.endpoints,
        connector,
    )?)
}

fn build_sign_relay(config: &Config) -> eyre::Result<SignRelay<AntelopeClient>> {
    let evm_key = config
        .evm
        .private_key
        .as_deref()
        .ok_or_else(|| eyre::eyre!("EVM_PRIVATE_KEY is required for the sign direction"))?;
    let signer = AttestationSigner::from_hex(evm_key)?;

    let settings = SignSettings {
        contract: config.antelope.contract.clone(),
        oracle: config.antelope.oracle_account.clone(),
        permission: config.antelope.permission.clone(),
        confirmations: config.relay.confirmations,
        batch_size: config.antelope.batch_size,
        wait_cycle: std::time::Duration::from_secs(config.antelope.wait_cycle_secs),
        max_finality_wait: std::time::Duration::from_secs(config.antelope.max_finality_wait_secs),
        dry_run: config.relay.dry_run,
    };

    Ok(SignRelay::new(
        antelope_pool(config)?,
        config.antelope.verifications,
        signer,
        CheckpointFile::new(&config.antelope.checkpoint_path),
        settings,
        config.antelope.start_id,
    )?)
}

fn build_receipt_relay(
    config: &Config,
) -> eyre::Result<ReceiptRelay<AntelopeClient, EvmClient>> {
    let evm_pool = EndpointPool::new(
        "evm",
        &config.evm.chain_id.to_string(),
        &config.evm.endpoints,
        EvmClient::connector(config.relay.request_timeout),
    )?;

    let settings = ReceiptSettings {
        contract: config.antelope.contract.clone(),
        oracle: config.antelope.oracle_account.clone(),
        permission: config.antelope.permission.clone(),
        evm_contract: config.evm.contract,
        token: config.token.clone(),
        max_block_range: config.evm.max_block_range,
        genesis_block: config.evm.genesis_block,
        rewind_margin: config.evm.rewind_margin,
        initial_lookback: config.evm.initial_lookback,
        catch_up_threshold: config.relay.catch_up_threshold,
        idle_poll: std::time::Duration::from_secs(config.relay.idle_poll_secs),
        dry_run: config.relay.dry_run,
    };

    Ok(ReceiptRelay::new(
        antelope_pool(config)?,
        evm_pool,
        EvmFinality::new(config.evm.blocks_to_wait, config.evm.verifications),
        CheckpointFile::new(&config.evm.checkpoint_path),
        settings,
        config.evm.start_block,
    ))
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,teleport_oracle=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
