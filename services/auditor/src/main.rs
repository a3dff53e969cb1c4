use anyhow::Result;
use booking::Settings;
use booking::ledger::EscrowLedger;
use booking::repositories::postgres::{PgAccountStore, PgOrderStore};
use common::database::{health_check, init_pool};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

mod auditor;

use auditor::Auditor;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .init();

    info!("Starting escrow auditor");

    let config_path = env::args()
        .nth(1)
        .or_else(|| env::var("BROKER_CONFIG").ok())
        .map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref())?;

    let pool = init_pool(&settings.database).await?;
    if health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    let ledger = EscrowLedger::new(
        Arc::new(PgAccountStore::new(pool.clone())),
        settings.accounts.clone(),
    );
    let auditor = Auditor::new(Arc::new(PgOrderStore::new(pool)), ledger);

    // Run periodically when a schedule is given, otherwise audit once
    if let Ok(schedule) = env::var("AUDIT_SCHEDULE") {
        let _scheduler = auditor.start_schedule(&schedule).await?;

        tokio::signal::ctrl_c().await?;
        info!("Shutting down escrow auditor");
        return Ok(());
    }

    let summary = auditor.run_once().await?;
    for report in &summary.failed {
        println!("{}", serde_json::to_string(report)?);
    }

    if !summary.is_clean() {
        error!(
            "{} of {} orders failed the escrow audit",
            summary.failed.len(),
            summary.audited
        );
        std::process::exit(1);
    }

    info!("All {} orders reconcile with the ledger", summary.audited);
    Ok(())
}
