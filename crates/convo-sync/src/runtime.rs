//! Process-level wiring.
//!
//! A [`SyncRuntime`] owns every long-lived handle: the primary pool, the
//! mirror client, the coordinator, metrics and the outbox drainer. It is built
//! once at startup from a [`Config`] and passed to whatever serves requests.

use crate::activity::ActivitySyncService;
use crate::config::Config;
use crate::error::SyncError;
use crate::metrics::Metrics;
use crate::session::{HistoryReplayer, SessionResolver};
use crate::store::{PrimaryStore, RestMirror, SqlitePrimary, StoreAdapter};
use crate::sync::{DualWriteCoordinator, OutboxDrainer, RetryPolicy, WritePolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct SyncRuntime {
    pub config: Config,
    pub coordinator: Arc<DualWriteCoordinator>,
    pub resolver: SessionResolver,
    pub history: HistoryReplayer,
    pub activities: ActivitySyncService,
    pub metrics: Arc<Metrics>,
    drainer: Option<OutboxDrainer>,
}

impl SyncRuntime {
    /// Opens both stores and builds the services. Does not start the drainer.
    pub fn open(config: Config) -> Result<Self, SyncError> {
        config.validate()?;

        let primary = SqlitePrimary::open(&config.primary.database_path, config.primary.pool_size)
            .map_err(|e| SyncError::primary("open", e))?;
        let primary: Arc<dyn PrimaryStore> = Arc::new(primary);

        let secondary: Option<Arc<dyn StoreAdapter>> = match &config.secondary {
            Some(secondary_config) => {
                let mirror = RestMirror::new(secondary_config)
                    .map_err(|e| SyncError::Configuration(format!("secondary client: {:#}", e)))?;
                info!("Mirroring writes to {}", secondary_config.url);
                Some(Arc::new(mirror))
            }
            None => {
                warn!("No secondary store configured, writes will not be mirrored");
                None
            }
        };

        let metrics = Arc::new(
            Metrics::new().map_err(|e| SyncError::Configuration(format!("metrics registry: {}", e)))?,
        );

        Ok(Self::with_stores(config, primary, secondary, metrics))
    }

    /// Builds the services over already-open stores.
    pub fn with_stores(
        config: Config,
        primary: Arc<dyn PrimaryStore>,
        secondary: Option<Arc<dyn StoreAdapter>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let policy = WritePolicy {
            primary_timeout: config.primary_timeout(),
            secondary_timeout: config.secondary_timeout(),
            outbox: retry_policy(&config),
        };
        let coordinator = Arc::new(DualWriteCoordinator::new(primary, secondary, policy).with_metrics(metrics.clone()));

        Self {
            resolver: SessionResolver::new(coordinator.clone()),
            history: HistoryReplayer::new(coordinator.clone(), config.history_limit),
            activities: ActivitySyncService::new(coordinator.clone()),
            coordinator,
            metrics,
            config,
            drainer: None,
        }
    }

    /// Opens the runtime and starts the outbox drainer when it applies.
    pub async fn start(config: Config) -> Result<Self, SyncError> {
        config.print_config();
        let mut runtime = Self::open(config)?;
        runtime.start_drainer();
        Ok(runtime)
    }

    /// Starts background redelivery. A no-op when already running, when the
    /// outbox is disabled, or when nothing is mirrored.
    pub fn start_drainer(&mut self) {
        if self.drainer.is_some() || !self.config.outbox.enabled || !self.coordinator.has_secondary() {
            return;
        }
        self.drainer = Some(OutboxDrainer::spawn(
            self.coordinator.clone(),
            Duration::from_secs(self.config.outbox.drain_interval_seconds),
            self.config.outbox.batch_size,
        ));
    }

    pub fn primary(&self) -> &Arc<dyn PrimaryStore> {
        self.coordinator.primary()
    }

    pub async fn shutdown(mut self) {
        if let Some(drainer) = self.drainer.take() {
            drainer.shutdown().await;
        }
        info!("Sync runtime stopped");
    }
}

fn retry_policy(config: &Config) -> Option<RetryPolicy> {
    config.outbox.enabled.then(|| RetryPolicy {
        max_attempts: config.outbox.max_attempts,
        base_backoff: Duration::from_secs(config.outbox.base_backoff_seconds),
        max_backoff: Duration::from_secs(config.outbox.max_backoff_seconds),
    })
}
