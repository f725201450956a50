//! # Zeropoint Agent
//!
//! Single-node configuration agent: serves the state API and reconciles the
//! host toward intent on a timer and on demand.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zeropoint_core::DiskRow;
use zeropoint_reconcile::{Executor, ExecutorConfig};
use zeropoint_state::{Branch, FileStateStore, StateStore, StoreConfig};

mod api;
mod config;
mod host;
mod scheduler;
mod state;

use config::AgentConfig;
use host::{HostLedger, LedgerProbe};
use scheduler::Scheduler;
use state::AppState;

/// Run the agent until the server stops.
pub async fn run_agent(config: AgentConfig) -> anyhow::Result<()> {
    info!("🚀 Zeropoint agent starting...");

    let store = Arc::new(
        FileStateStore::initialize(StoreConfig::new(&config.state_dir, &config.defaults_file))
            .context("state store initialization failed")?,
    );

    let reality = store.snapshot(Branch::Reality).await?;
    let ledger = Arc::new(HostLedger::open(
        config.state_dir.join(host::LEDGER_FILE),
        &reality.snapshot,
        host::current_boot_id(),
    )?);
    info!(boot_id = ledger.boot_id(), "Host ledger at {}", ledger.path().display());
    if ledger.rebooted() {
        let intent = store.snapshot(Branch::Intent).await?;
        let attached = ledger.attach_new_disks(intent.snapshot.typed::<DiskRow>())?;
        if !attached.is_empty() {
            info!(disks = ?attached, "New disks came up with this boot");
        }
    }
    for staged in ledger.staged() {
        info!(disk = %staged.disk.id, "Disk is staged until the next reboot");
    }

    let executor = Executor::new(
        store.clone(),
        Arc::new(LedgerProbe::new(ledger.clone())),
        host::registry(ledger),
        ExecutorConfig {
            reboot_policy: config.reboot_policy,
        },
    );

    // Start the scheduler background task
    match config.reconcile_interval {
        Some(period) => {
            let scheduler = Arc::new(Scheduler::new(executor.clone(), period));
            tokio::spawn(async move {
                scheduler.run().await;
            });
        }
        None => info!("Timer-driven reconciliation disabled"),
    }

    let app = api::router(AppState::new(store, executor));

    info!("🌐 Listening on http://{}", config.listen_addr);

    let listener = TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = AgentConfig::from_env()?;
    run_agent(config).await
}
