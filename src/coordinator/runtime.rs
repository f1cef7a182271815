use super::Coordinator;
use crate::error::Result;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};

impl Coordinator {
    /// Poll on the configured interval until shutdown is requested.
    ///
    /// Each tick runs its cycle as its own task, so a tick that lands while a
    /// cycle is still confirming outputs is dropped by the cycle lock rather
    /// than queued. Cycle errors are logged and polling continues.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let period = self.config.timing.poll_interval();
        self.logger.info(&format!(
            "Starting control loop (interval {:?}, mode {})",
            period,
            self.mode()
        ));

        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow_and_update() {
            self.logger.info("Shutdown requested before start");
            return Ok(());
        }

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let coordinator = Arc::clone(&self);
                    cycles.spawn(async move {
                        // Errors are already logged and published by the cycle
                        let _ = coordinator.poll_cycle().await;
                    });
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        self.logger.error(&format!("Cycle task aborted: {}", e));
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.logger.info("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        // Let the cycle in flight finish its bounded waits
        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                self.logger.error(&format!("Cycle task aborted: {}", e));
            }
        }
        self.logger.info("Control loop stopped");
        Ok(())
    }
}
