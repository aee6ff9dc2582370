use crate::{context::AppContext, metrics};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, sleep, Duration};
use tracing::{error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::asset_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::run_pruning_job(Arc::clone(&self)));
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Remove expired run assets
    ///
    /// Waits the initial delay, then sleeps the interval after each finished
    /// pass so passes never overlap.
    async fn asset_cleanup_job(scheduler: Arc<Self>) {
        let cleanup = &scheduler.context.config.cleanup;
        sleep(Duration::from_secs(cleanup.initial_delay_secs)).await;

        loop {
            let start = Instant::now();
            match tasks::cleanup_expired_assets(&scheduler.context).await {
                Ok(count) => {
                    metrics::record_background_job("asset_cleanup", "success", start.elapsed().as_secs_f64());
                    if count > 0 {
                        info!("Cleaned up assets of {} generation runs", count);
                    }
                }
                Err(e) => {
                    metrics::record_background_job("asset_cleanup", "error", start.elapsed().as_secs_f64());
                    error!("Failed to clean up generation assets: {}", e);
                }
            }

            sleep(Duration::from_secs(cleanup.interval_secs)).await;
        }
    }

    /// Delete old finished runs (runs daily)
    async fn run_pruning_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(86400));

        loop {
            interval.tick().await;

            let start = Instant::now();
            match tasks::prune_generation_runs(&scheduler.context).await {
                Ok(count) => {
                    metrics::record_background_job("run_pruning", "success", start.elapsed().as_secs_f64());
                    if count > 0 {
                        info!("Pruned {} generation runs", count);
                    }
                }
                Err(e) => {
                    metrics::record_background_job("run_pruning", "error", start.elapsed().as_secs_f64());
                    error!("Failed to prune generation runs: {}", e);
                }
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            if let Err(e) = tasks::health_check(&scheduler.context).await {
                error!("Health check failed: {}", e);
            }
        }
    }
}
