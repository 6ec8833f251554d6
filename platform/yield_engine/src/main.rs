//! Yield Engine runner
//!
//! Loads configuration, resumes the ledger from storage and accrues payouts
//! on a fixed interval until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use yield_engine::{
    tracing_logger, AccrualRunner, EngineConfig, InMemoryRepository, InvestmentService,
    JsonFileRepository, ServiceSettings, StateRepository, StoreBackend, SystemClock,
    TracingNotifier,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let config = EngineConfig::load().context("invalid engine configuration")?;
    tracing_logger::init_subscriber(&config.logging.level);

    let repository: Arc<dyn StateRepository> = match config.persistence.backend {
        StoreBackend::Memory => Arc::new(InMemoryRepository::new()),
        StoreBackend::Json => Arc::new(JsonFileRepository::new(&config.persistence.path)),
    };

    info!(
        backend = repository.name(),
        cycle_period = ?config.accrual.cycle_period,
        tick_interval = ?config.accrual.tick_interval,
        referral_rate = %config.accrual.referral_rate,
        "Starting yield engine"
    );

    let service = InvestmentService::open(
        ServiceSettings::from(&config),
        repository,
        Arc::new(SystemClock),
    )
    .await
    .context("failed to open ledger")?
    .with_notifier(Arc::new(TracingNotifier));
    let service = Arc::new(service);

    // Catch up anything that came due while the process was down
    let report = service.tick().await.context("catch-up accrual failed")?;
    info!(payouts = report.payouts, credited = %report.total_credited, "Catch-up accrual done");

    let runner = AccrualRunner::new(service.clone(), config.accrual.tick_interval).spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    runner.shutdown().await;

    let stats = service.platform_stats().await;
    info!(
        users = stats.total_users,
        invested = %stats.total_invested,
        pending_withdrawals = stats.pending_withdrawals,
        platform_balance = %stats.platform_balance,
        "Final ledger state"
    );
    Ok(())
}
