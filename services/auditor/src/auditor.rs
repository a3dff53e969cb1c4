use anyhow::Result;
use booking::BookingResult;
use booking::ledger::{AuditReport, EscrowLedger};
use booking::models::OrderState;
use booking::repositories::OrderStore;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

const ALL_STATES: &[OrderState] = &[
    OrderState::Created,
    OrderState::AgreedPhotographer,
    OrderState::AgreedClient,
    OrderState::Meeting,
    OrderState::WatermarkSent,
    OrderState::Finish,
];

/// Outcome of one pass over every order
#[derive(Debug, Default)]
pub struct AuditSummary {
    pub audited: usize,
    pub failed: Vec<AuditReport>,
}

impl AuditSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct Auditor {
    orders: Arc<dyn OrderStore>,
    ledger: EscrowLedger,
}

impl Auditor {
    pub fn new(orders: Arc<dyn OrderStore>, ledger: EscrowLedger) -> Self {
        Self { orders, ledger }
    }

    pub async fn run_once(&self) -> BookingResult<AuditSummary> {
        let orders = self.orders.list_by_states(ALL_STATES).await?;
        let mut summary = AuditSummary::default();

        for order in &orders {
            let report = self.ledger.audit(order).await?;
            summary.audited += 1;
            if !report.is_clean() {
                summary.failed.push(report);
            }
        }

        info!(
            "Audited {} orders, {} with violations",
            summary.audited,
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Run an audit pass on every tick of a cron schedule
    pub async fn start_schedule(&self, schedule: &str) -> Result<JobScheduler> {
        let auditor = self.clone();
        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(schedule, move |_, _| {
            let auditor = auditor.clone();
            Box::pin(async move {
                if let Err(e) = auditor.run_once().await {
                    error!("Audit pass failed: {}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!("Started audit scheduler with schedule: {}", schedule);
        Ok(scheduler)
    }
}
