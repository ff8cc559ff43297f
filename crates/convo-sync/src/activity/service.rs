//! Create, update and delete of scheduled activities through the coordinator.

use super::input::{ActivityChanges, ActivityInput};
use crate::error::SyncError;
use crate::model::{ActivityId, ScheduledActivity};
use crate::sync::{ActivityWrite, DualWriteCoordinator, WriteOp};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ActivitySyncService {
    coordinator: Arc<DualWriteCoordinator>,
}

impl ActivitySyncService {
    pub fn new(coordinator: Arc<DualWriteCoordinator>) -> Self {
        Self { coordinator }
    }

    pub async fn create(&self, input: ActivityInput) -> Result<ActivityId, SyncError> {
        let draft = input.into_draft()?;
        let outcome = self
            .coordinator
            .apply(WriteOp::UpsertActivity(ActivityWrite::Create(draft)))
            .await?;
        info!(activity_id = %outcome.primary_id, mirror = outcome.mirror.as_str(), "activity created");
        Ok(ActivityId::new(outcome.primary_id))
    }

    /// Applies only the provided fields. The mirror row is located by its
    /// linked id, or by the activity's natural key as it was before the change.
    pub async fn update(&self, id: &ActivityId, changes: ActivityChanges) -> Result<(), SyncError> {
        let patch = changes.into_patch()?;
        if patch.is_empty() {
            debug!(activity_id = %id, "empty update ignored");
            return Ok(());
        }

        let current = self.current(id).await?;
        let merged = patch.merged_with(&current);
        if !merged.has_valid_time_range() {
            return Err(SyncError::Validation(format!(
                "time_start {} is after time_end {}",
                merged.time_start, merged.time_end
            )));
        }

        let outcome = self
            .coordinator
            .apply(WriteOp::UpsertActivity(ActivityWrite::Update {
                id: id.clone(),
                patch,
                match_key: current.natural_key(),
            }))
            .await?;
        info!(activity_id = %id, mirror = outcome.mirror.as_str(), "activity updated");
        Ok(())
    }

    pub async fn delete(&self, id: &ActivityId) -> Result<(), SyncError> {
        let current = self.current(id).await?;
        let outcome = self
            .coordinator
            .apply(WriteOp::DeleteActivity {
                id: id.clone(),
                match_key: current.natural_key(),
            })
            .await?;
        info!(activity_id = %id, mirror = outcome.mirror.as_str(), "activity deleted");
        Ok(())
    }

    pub async fn get(&self, id: &ActivityId) -> Result<Option<ScheduledActivity>, SyncError> {
        let primary = self.coordinator.primary();
        self.coordinator.read_primary("get_activity", primary.activity(id)).await
    }

    async fn current(&self, id: &ActivityId) -> Result<ScheduledActivity, SyncError> {
        self.get(id).await?.ok_or_else(|| SyncError::ActivityNotFound(id.clone()))
    }
}
