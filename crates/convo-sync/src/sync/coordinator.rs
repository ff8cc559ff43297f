//! Dual-write coordination between the authoritative store and its mirror.
//!
//! Every write runs against the primary store first and only then against
//! the secondary store. A primary failure or timeout aborts the operation
//! before the secondary is touched. A secondary failure never fails the
//! caller: it is logged with the full operation payload and, when an outbox
//! is configured, queued on the primary for redelivery by
//! [`DualWriteCoordinator::drain_outbox`].

use super::ops::{ActivityWrite, DrainReport, MirrorOp, MirrorStatus, RetryPolicy, WriteOp, WriteOutcome};
use crate::error::SyncError;
use crate::metrics::Metrics;
use crate::model::{ContactSession, MessageDraft, MessageId, SessionDraft, SessionId};
use crate::store::{ActivityTarget, LinkKind, PrimaryStore, StoreAdapter};
use anyhow::anyhow;
use chrono::Utc;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// Timeouts and redelivery settings for a coordinator.
#[derive(Debug, Clone)]
pub struct WritePolicy {
    pub primary_timeout: Duration,
    pub secondary_timeout: Duration,
    /// `None` logs and drops failed mirror writes.
    pub outbox: Option<RetryPolicy>,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            primary_timeout: Duration::from_secs(5),
            secondary_timeout: Duration::from_secs(3),
            outbox: Some(RetryPolicy::default()),
        }
    }
}

pub struct DualWriteCoordinator {
    primary: Arc<dyn PrimaryStore>,
    secondary: Option<Arc<dyn StoreAdapter>>,
    policy: WritePolicy,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
    metrics: Option<Arc<Metrics>>,
}

impl DualWriteCoordinator {
    pub fn new(primary: Arc<dyn PrimaryStore>, secondary: Option<Arc<dyn StoreAdapter>>, policy: WritePolicy) -> Self {
        Self {
            primary,
            secondary,
            policy,
            session_locks: DashMap::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn primary(&self) -> &Arc<dyn PrimaryStore> {
        &self.primary
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    pub(crate) fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    /// Applies a write to the primary store, then mirrors it.
    ///
    /// Returns the primary-assigned id. Errors only when the primary write
    /// fails, times out or targets a missing row.
    pub async fn apply(&self, op: WriteOp) -> Result<WriteOutcome, SyncError> {
        let operation = op.name();
        let op_key = op.session_key();
        let _op_guard = match &op_key {
            Some(key) => Some(self.lock_session(key).await),
            None => None,
        };

        let (primary_id, mirror) = self.apply_primary(op).await?;

        let mirror = match mirror {
            Some(mirror_op) => {
                let mirror_key = mirror_op.session_key();
                let _mirror_guard = match mirror_key {
                    Some(key) if Some(&key) != op_key.as_ref() => Some(self.lock_session(&key).await),
                    _ => None,
                };
                self.mirror_or_defer(mirror_op).await
            }
            None => MirrorStatus::Skipped,
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_write(operation, "secondary", mirror.as_str());
        }
        debug!(operation, primary_id = %primary_id, mirror = mirror.as_str(), "write applied");
        Ok(WriteOutcome { primary_id, mirror })
    }

    /// Convenience for the inbound turn path.
    pub async fn save_message(&self, session_id: &SessionId, draft: MessageDraft) -> Result<MessageId, SyncError> {
        let outcome = self
            .apply(WriteOp::InsertMessage {
                session_id: session_id.clone(),
                draft,
            })
            .await?;
        Ok(MessageId::new(outcome.primary_id))
    }

    /// Redelivers due outbox entries. A no-op without a secondary store or an outbox.
    pub async fn drain_outbox(&self, batch_size: u32) -> Result<DrainReport, SyncError> {
        let mut report = DrainReport::default();
        let Some(retry) = &self.policy.outbox else {
            return Ok(report);
        };
        if self.secondary.is_none() {
            return Ok(report);
        }

        let due = self
            .read_primary("drain_outbox", self.primary.due_mirrors(Utc::now(), batch_size))
            .await?;

        for entry in due {
            let attempts = entry.attempts.saturating_add(1);
            let op: MirrorOp = match serde_json::from_str(&entry.payload) {
                Ok(op) => op,
                Err(e) => {
                    error!(outbox_id = entry.id, error = %e, "undecodable outbox entry, marking dead");
                    self.reschedule(entry.id, &format!("undecodable payload: {}", e), retry, attempts, true)
                        .await;
                    report.dead += 1;
                    continue;
                }
            };

            let _guard = match op.session_key() {
                Some(key) => Some(self.lock_session(&key).await),
                None => None,
            };

            match self.mirror(&op).await {
                Ok(()) => {
                    if let Err(e) = self.primary.complete_mirror(entry.id).await {
                        warn!(outbox_id = entry.id, error = %e, "delivered outbox entry could not be removed");
                    }
                    info!(outbox_id = entry.id, operation = op.name(), attempts, "outbox entry delivered");
                    report.delivered += 1;
                }
                Err(e) => {
                    let dead = attempts >= retry.max_attempts;
                    self.reschedule(entry.id, &format!("{:#}", e), retry, attempts, dead).await;
                    if dead {
                        error!(
                            outbox_id = entry.id,
                            operation = op.name(),
                            store = self.secondary_label(),
                            attempts,
                            error = %e,
                            payload = %entry.payload,
                            "outbox entry exhausted its attempts; manual reconciliation needed"
                        );
                        report.dead += 1;
                    } else {
                        warn!(
                            outbox_id = entry.id,
                            operation = op.name(),
                            store = self.secondary_label(),
                            attempts,
                            error = %e,
                            "outbox redelivery failed"
                        );
                        report.retried += 1;
                    }
                }
            }
        }

        self.refresh_pending_gauge().await;
        Ok(report)
    }

    /// Runs a primary read with the primary timeout and error mapping.
    pub(crate) async fn read_primary<T, F>(&self, operation: &'static str, fut: F) -> Result<T, SyncError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.policy.primary_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(operation, store = self.primary.label(), error = %format!("{:#}", e), "primary store failed");
                Err(SyncError::primary(operation, e))
            }
            Err(_) => {
                error!(
                    operation,
                    store = self.primary.label(),
                    timeout = ?self.policy.primary_timeout,
                    "primary store timed out"
                );
                Err(SyncError::primary(
                    operation,
                    anyhow!("timed out after {:?}", self.policy.primary_timeout),
                ))
            }
        }
    }

    async fn write_primary<T, F>(&self, operation: &'static str, fut: F) -> Result<T, SyncError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let result = self.read_primary(operation, fut).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_write(operation, "primary", if result.is_ok() { "ok" } else { "error" });
        }
        result
    }

    async fn lock_session(&self, key: &str) -> SessionLock<'_> {
        let lock = self
            .session_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        SessionLock {
            locks: &self.session_locks,
            key: key.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn secondary_label(&self) -> &'static str {
        self.secondary.as_ref().map(|s| s.label()).unwrap_or("none")
    }

    async fn apply_primary(&self, op: WriteOp) -> Result<(String, Option<MirrorOp>), SyncError> {
        let operation = op.name();
        match op {
            WriteOp::CreateSession(draft) => {
                let insert = self.write_primary(operation, self.primary.insert_session(&draft)).await?;
                let mirror = insert.created.then(|| MirrorOp::CreateSession {
                    primary_id: insert.id.clone(),
                    draft,
                });
                Ok((insert.id, mirror))
            }
            WriteOp::EndSession(session_id) => {
                let session = self.existing_session(operation, &session_id).await?;
                let ended = self
                    .write_primary(operation, self.primary.end_session(session_id.as_str()))
                    .await?;
                let mirror = ended.then(|| MirrorOp::EndSession { session });
                Ok((session_id.into_inner(), mirror))
            }
            WriteOp::InsertMessage { session_id, mut draft } => {
                let session = self.existing_session(operation, &session_id).await?;
                let receipt = self
                    .write_primary(operation, self.primary.insert_message(session_id.as_str(), &draft))
                    .await?;
                draft.created_at = Some(receipt.created_at);
                let mirror = MirrorOp::InsertMessage {
                    primary_id: receipt.id.clone(),
                    session,
                    draft,
                };
                Ok((receipt.id, Some(mirror)))
            }
            WriteOp::UpsertActivity(ActivityWrite::Create(draft)) => {
                let id = self.write_primary(operation, self.primary.insert_activity(&draft)).await?;
                let mirror = MirrorOp::CreateActivity {
                    primary_id: id.clone(),
                    draft,
                };
                Ok((id, Some(mirror)))
            }
            WriteOp::UpsertActivity(ActivityWrite::Update { id, patch, match_key }) => {
                let target = ActivityTarget::Id(id.to_string());
                let updated = self
                    .write_primary(operation, self.primary.update_activity(&target, &patch))
                    .await?;
                if updated.is_none() {
                    return Err(SyncError::ActivityNotFound(id));
                }
                let mirror = MirrorOp::UpdateActivity {
                    primary_id: id.to_string(),
                    patch,
                    match_key,
                };
                Ok((id.into_inner(), Some(mirror)))
            }
            WriteOp::DeleteActivity { id, match_key } => {
                let target = ActivityTarget::Id(id.to_string());
                let deleted = self.write_primary(operation, self.primary.delete_activity(&target)).await?;
                if !deleted {
                    return Err(SyncError::ActivityNotFound(id));
                }
                let mirror = MirrorOp::DeleteActivity {
                    primary_id: id.to_string(),
                    match_key,
                };
                Ok((id.into_inner(), Some(mirror)))
            }
        }
    }

    async fn existing_session(&self, operation: &'static str, id: &SessionId) -> Result<ContactSession, SyncError> {
        self.read_primary(operation, self.primary.session(id))
            .await?
            .ok_or_else(|| SyncError::SessionNotFound(id.clone()))
    }

    async fn mirror_or_defer(&self, op: MirrorOp) -> MirrorStatus {
        if self.secondary.is_none() {
            return MirrorStatus::Disabled;
        }

        let session_key = op.session_key();
        if let (Some(_), Some(key)) = (&self.policy.outbox, &session_key) {
            match self.primary.has_pending_mirrors(key).await {
                Ok(true) => {
                    debug!(operation = op.name(), session = %key, "queueing behind undelivered writes");
                    return self.defer(&op, "queued behind earlier undelivered writes").await;
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "could not check outbox backlog"),
            }
        }

        match self.mirror(&op).await {
            Ok(()) => MirrorStatus::Mirrored,
            Err(e) => {
                let reason = format!("{:#}", e);
                error!(
                    operation = op.name(),
                    store = self.secondary_label(),
                    error = %reason,
                    payload = %payload_of(&op),
                    "secondary write failed; primary result kept"
                );
                if self.policy.outbox.is_some() {
                    self.defer(&op, &reason).await
                } else {
                    MirrorStatus::Failed
                }
            }
        }
    }

    async fn defer(&self, op: &MirrorOp, reason: &str) -> MirrorStatus {
        let Some(retry) = &self.policy.outbox else {
            return MirrorStatus::Failed;
        };
        let next_attempt_at = Utc::now() + chrono_delay(retry.delay(1));
        let session_key = op.session_key();
        match self
            .primary
            .enqueue_mirror(op.name(), session_key.as_deref(), &payload_of(op), reason, next_attempt_at)
            .await
        {
            Ok(outbox_id) => {
                info!(operation = op.name(), outbox_id, "secondary write queued for redelivery");
                self.refresh_pending_gauge().await;
                MirrorStatus::Deferred { outbox_id }
            }
            Err(e) => {
                error!(operation = op.name(), error = %e, payload = %payload_of(op), "could not queue secondary write");
                MirrorStatus::Failed
            }
        }
    }

    async fn reschedule(&self, id: i64, reason: &str, retry: &RetryPolicy, attempts: u32, dead: bool) {
        let next_attempt_at = Utc::now() + chrono_delay(retry.delay(attempts));
        if let Err(e) = self.primary.reschedule_mirror(id, reason, next_attempt_at, dead).await {
            warn!(outbox_id = id, error = %e, "could not reschedule outbox entry");
        }
    }

    async fn refresh_pending_gauge(&self) {
        if let Some(metrics) = &self.metrics {
            if let Ok(pending) = self.primary.pending_mirror_count().await {
                metrics.set_outbox_pending(pending);
            }
        }
    }

    /// Delivers one operation to the secondary store within the secondary timeout.
    async fn mirror(&self, op: &MirrorOp) -> anyhow::Result<()> {
        let secondary = self
            .secondary
            .as_ref()
            .ok_or_else(|| anyhow!("no secondary store configured"))?;
        tokio::time::timeout(self.policy.secondary_timeout, self.deliver(secondary.as_ref(), op))
            .await
            .map_err(|_| anyhow!("secondary timed out after {:?}", self.policy.secondary_timeout))?
    }

    async fn deliver(&self, secondary: &dyn StoreAdapter, op: &MirrorOp) -> anyhow::Result<()> {
        match op {
            MirrorOp::CreateSession { primary_id, draft } => {
                let insert = secondary.insert_session(draft).await?;
                self.remember(LinkKind::Session, primary_id, &insert.id).await;
            }
            MirrorOp::EndSession { session } => match self.secondary_session(secondary, session, false).await? {
                Some(remote) => {
                    if !secondary.end_session(&remote).await? {
                        debug!(session_id = %session.id, "mirrored session was already ended");
                    }
                }
                None => warn!(session_id = %session.id, "no mirrored session to end"),
            },
            MirrorOp::InsertMessage {
                primary_id,
                session,
                draft,
            } => {
                let remote = self
                    .secondary_session(secondary, session, true)
                    .await?
                    .ok_or_else(|| anyhow!("no mirrored session for {}", session.id))?;
                let receipt = secondary.insert_message(&remote, draft).await?;
                self.remember(LinkKind::Message, primary_id, &receipt.id).await;
            }
            MirrorOp::CreateActivity { primary_id, draft } => {
                let remote = secondary.insert_activity(draft).await?;
                self.remember(LinkKind::Activity, primary_id, &remote).await;
            }
            MirrorOp::UpdateActivity {
                primary_id,
                patch,
                match_key,
            } => {
                let (target, linked) = self.activity_target(primary_id, match_key).await;
                match secondary.update_activity(&target, patch).await? {
                    Some(remote) if !linked => self.remember(LinkKind::Activity, primary_id, &remote).await,
                    Some(_) => {}
                    None => warn!(activity_id = %primary_id, "no mirrored activity matched the update"),
                }
            }
            MirrorOp::DeleteActivity { primary_id, match_key } => {
                let (target, _) = self.activity_target(primary_id, match_key).await;
                if !secondary.delete_activity(&target).await? {
                    warn!(activity_id = %primary_id, "no mirrored activity matched the delete");
                }
            }
        }
        Ok(())
    }

    /// Finds the secondary row for a session: linked id first, then the active
    /// row for the same contact and channel, then (if allowed) a fresh insert.
    async fn secondary_session(
        &self,
        secondary: &dyn StoreAdapter,
        session: &ContactSession,
        create_missing: bool,
    ) -> anyhow::Result<Option<String>> {
        match self.primary.linked(LinkKind::Session, session.id.as_str()).await {
            Ok(Some(remote)) => return Ok(Some(remote)),
            Ok(None) => {}
            Err(e) => warn!(session_id = %session.id, error = %e, "could not read session link"),
        }

        if session.is_active() || !create_missing {
            if let Some(remote) = secondary
                .find_active_session(&session.contact_identity, session.channel)
                .await?
            {
                self.remember(LinkKind::Session, session.id.as_str(), &remote).await;
                return Ok(Some(remote));
            }
        }

        if !create_missing {
            return Ok(None);
        }
        let insert = secondary.insert_session(&SessionDraft::from(session)).await?;
        self.remember(LinkKind::Session, session.id.as_str(), &insert.id).await;
        Ok(Some(insert.id))
    }

    async fn activity_target(&self, primary_id: &str, match_key: &crate::model::NaturalKey) -> (ActivityTarget, bool) {
        match self.primary.linked(LinkKind::Activity, primary_id).await {
            Ok(Some(remote)) => (ActivityTarget::Id(remote), true),
            Ok(None) => (ActivityTarget::NaturalKey(match_key.clone()), false),
            Err(e) => {
                warn!(activity_id = %primary_id, error = %e, "could not read activity link, matching by natural key");
                (ActivityTarget::NaturalKey(match_key.clone()), false)
            }
        }
    }

    async fn remember(&self, kind: LinkKind, primary_id: &str, secondary_id: &str) {
        if let Err(e) = self.primary.link(kind, primary_id, secondary_id).await {
            warn!(kind = kind.as_str(), primary_id, secondary_id, error = %e, "could not record mirror link");
        }
    }
}

/// Holds a per-key write lock. On drop the map entry is evicted unless
/// another writer is holding or waiting on it.
struct SessionLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn payload_of(op: &MirrorOp) -> String {
    serde_json::to_string(op).unwrap_or_else(|e| format!("{:?} (unserializable: {})", op, e))
}

fn chrono_delay(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}
