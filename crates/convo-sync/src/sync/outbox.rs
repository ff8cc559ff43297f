//! Background redelivery of queued mirror writes.

use super::coordinator::DualWriteCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Periodically drains the outbox until shut down.
pub struct OutboxDrainer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl OutboxDrainer {
    pub fn spawn(coordinator: Arc<DualWriteCoordinator>, every: Duration, batch_size: u32) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(Self::run_drain_loop(coordinator, every, batch_size, shutdown_rx));
        info!("Outbox drainer started (every {:?}, batch {})", every, batch_size);
        Self {
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    async fn run_drain_loop(
        coordinator: Arc<DualWriteCoordinator>,
        every: Duration,
        batch_size: u32,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    match coordinator.drain_outbox(batch_size).await {
                        Ok(report) if report.is_idle() => {}
                        Ok(report) => debug!(
                            delivered = report.delivered,
                            retried = report.retried,
                            dead = report.dead,
                            "outbox drain pass"
                        ),
                        Err(e) => error!("Outbox drain failed: {}", e),
                    }
                }
            }
        }

        info!("Outbox drainer shutting down");
    }

    /// Stops the loop after any in-flight pass completes.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.handle.await {
            error!("Outbox drainer task failed: {}", e);
        }
    }
}
