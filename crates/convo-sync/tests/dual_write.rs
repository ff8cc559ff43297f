//! End-to-end behaviour of the dual-write path against an in-process mirror double.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convo_sync::model::{
    ActivityDraft, ActivityPatch, Channel, ContactSession, Message, MessageDraft, MessageReceipt,
    ScheduledActivity, SessionDraft, SessionId, SessionStats, TurnRole,
};
use convo_sync::store::{ActivityTarget, LinkKind, OutboxEntry, SessionInsert};
use convo_sync::sync::{ActivityWrite, RetryPolicy};
use convo_sync::{
    ActivityChanges, ActivityId, ActivityInput, ActivitySyncService, DualWriteCoordinator, HistoryReplayer,
    MirrorStatus, PrimaryStore, SessionResolver, SqlitePrimary, StoreAdapter, SyncError, WriteOp, WritePolicy,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ===== Test doubles =====

/// In-memory mirror that can be switched into failure or slow mode.
#[derive(Default)]
struct FlakySecondary {
    failing: AtomicBool,
    slow: AtomicBool,
    calls: AtomicUsize,
    next_id: AtomicUsize,
    log: Mutex<Vec<String>>,
    active: Mutex<HashMap<(String, Channel), String>>,
    activities: Mutex<HashMap<String, ActivityDraft>>,
}

impl FlakySecondary {
    fn failing() -> Arc<Self> {
        let secondary = Self::default();
        secondary.failing.store(true, Ordering::SeqCst);
        Arc::new(secondary)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("secondary unavailable");
        }
        Ok(())
    }

    fn fresh_id(&self) -> String {
        format!("r{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl StoreAdapter for FlakySecondary {
    fn label(&self) -> &'static str {
        "flaky"
    }

    async fn find_active_session(&self, contact_identity: &str, channel: Channel) -> Result<Option<String>> {
        self.enter().await?;
        Ok(self
            .active
            .lock()
            .unwrap()
            .get(&(contact_identity.to_string(), channel))
            .cloned())
    }

    async fn insert_session(&self, draft: &SessionDraft) -> Result<SessionInsert> {
        self.enter().await?;
        let key = (draft.contact_identity.clone(), draft.channel);
        if let Some(id) = self.active.lock().unwrap().get(&key) {
            return Ok(SessionInsert {
                id: id.clone(),
                created: false,
            });
        }
        let id = self.fresh_id();
        self.active.lock().unwrap().insert(key, id.clone());
        self.record(format!("session:{}:{}", id, draft.contact_identity));
        Ok(SessionInsert { id, created: true })
    }

    async fn end_session(&self, session_ref: &str) -> Result<bool> {
        self.enter().await?;
        let mut active = self.active.lock().unwrap();
        let before = active.len();
        active.retain(|_, id| id != session_ref);
        let ended = active.len() < before;
        drop(active);
        if ended {
            self.record(format!("end:{}", session_ref));
        }
        Ok(ended)
    }

    async fn insert_message(&self, session_ref: &str, draft: &MessageDraft) -> Result<MessageReceipt> {
        self.enter().await?;
        let id = self.fresh_id();
        self.record(format!("message:{}:{}", session_ref, draft.content));
        Ok(MessageReceipt {
            id,
            sequence: 0,
            created_at: draft.created_at.unwrap_or_else(Utc::now),
        })
    }

    async fn insert_activity(&self, draft: &ActivityDraft) -> Result<String> {
        self.enter().await?;
        let id = self.fresh_id();
        self.activities.lock().unwrap().insert(id.clone(), draft.clone());
        self.record(format!("activity:create:{}", id));
        Ok(id)
    }

    async fn update_activity(&self, target: &ActivityTarget, _patch: &ActivityPatch) -> Result<Option<String>> {
        self.enter().await?;
        let matched = self.matching_activity(target);
        if let Some(id) = &matched {
            self.record(format!("activity:update:{}:{}", describe(target), id));
        }
        Ok(matched)
    }

    async fn delete_activity(&self, target: &ActivityTarget) -> Result<bool> {
        self.enter().await?;
        let matched = self.matching_activity(target);
        if let Some(id) = &matched {
            self.activities.lock().unwrap().remove(id);
            self.record(format!("activity:delete:{}:{}", describe(target), id));
        }
        Ok(matched.is_some())
    }
}

impl FlakySecondary {
    fn matching_activity(&self, target: &ActivityTarget) -> Option<String> {
        let activities = self.activities.lock().unwrap();
        match target {
            ActivityTarget::Id(id) => activities.contains_key(id).then(|| id.clone()),
            ActivityTarget::NaturalKey(key) => activities
                .iter()
                .find(|(_, draft)| &draft.natural_key() == key)
                .map(|(id, _)| id.clone()),
        }
    }
}

fn describe(target: &ActivityTarget) -> &'static str {
    match target {
        ActivityTarget::Id(_) => "id",
        ActivityTarget::NaturalKey(_) => "key",
    }
}

#[derive(Clone, Copy)]
enum Breakage {
    Fail,
    Hang,
}

/// Primary whose writes break while its reads keep working.
struct BrokenPrimary {
    inner: SqlitePrimary,
    breakage: Breakage,
}

impl BrokenPrimary {
    async fn broken<T>(&self) -> Result<T> {
        if let Breakage::Hang = self.breakage {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        bail!("disk I/O error")
    }
}

#[async_trait]
impl StoreAdapter for BrokenPrimary {
    fn label(&self) -> &'static str {
        "broken"
    }

    async fn find_active_session(&self, contact_identity: &str, channel: Channel) -> Result<Option<String>> {
        self.inner.find_active_session(contact_identity, channel).await
    }

    async fn insert_session(&self, _draft: &SessionDraft) -> Result<SessionInsert> {
        self.broken().await
    }

    async fn end_session(&self, _session_ref: &str) -> Result<bool> {
        self.broken().await
    }

    async fn insert_message(&self, _session_ref: &str, _draft: &MessageDraft) -> Result<MessageReceipt> {
        self.broken().await
    }

    async fn insert_activity(&self, _draft: &ActivityDraft) -> Result<String> {
        self.broken().await
    }

    async fn update_activity(&self, _target: &ActivityTarget, _patch: &ActivityPatch) -> Result<Option<String>> {
        self.broken().await
    }

    async fn delete_activity(&self, _target: &ActivityTarget) -> Result<bool> {
        self.broken().await
    }
}

#[async_trait]
impl PrimaryStore for BrokenPrimary {
    async fn session(&self, id: &SessionId) -> Result<Option<ContactSession>> {
        self.inner.session(id).await
    }

    async fn contact_sessions(&self, contact_identity: &str, channel: Option<Channel>) -> Result<Vec<ContactSession>> {
        self.inner.contact_sessions(contact_identity, channel).await
    }

    async fn active_sessions(&self, limit: u32) -> Result<Vec<ContactSession>> {
        self.inner.active_sessions(limit).await
    }

    async fn recent_messages(&self, session: &SessionId, limit: u32) -> Result<Vec<Message>> {
        self.inner.recent_messages(session, limit).await
    }

    async fn activity(&self, id: &ActivityId) -> Result<Option<ScheduledActivity>> {
        self.inner.activity(id).await
    }

    async fn session_stats(&self) -> Result<SessionStats> {
        self.inner.session_stats().await
    }

    async fn link(&self, kind: LinkKind, primary_id: &str, secondary_id: &str) -> Result<()> {
        self.inner.link(kind, primary_id, secondary_id).await
    }

    async fn linked(&self, kind: LinkKind, primary_id: &str) -> Result<Option<String>> {
        self.inner.linked(kind, primary_id).await
    }

    async fn enqueue_mirror(
        &self,
        operation: &str,
        session_key: Option<&str>,
        payload: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.inner
            .enqueue_mirror(operation, session_key, payload, error, next_attempt_at)
            .await
    }

    async fn has_pending_mirrors(&self, session_key: &str) -> Result<bool> {
        self.inner.has_pending_mirrors(session_key).await
    }

    async fn due_mirrors(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<OutboxEntry>> {
        self.inner.due_mirrors(now, limit).await
    }

    async fn complete_mirror(&self, id: i64) -> Result<()> {
        self.inner.complete_mirror(id).await
    }

    async fn reschedule_mirror(&self, id: i64, error: &str, next_attempt_at: DateTime<Utc>, dead: bool) -> Result<()> {
        self.inner.reschedule_mirror(id, error, next_attempt_at, dead).await
    }

    async fn outbox_entries(&self, include_dead: bool, limit: u32) -> Result<Vec<OutboxEntry>> {
        self.inner.outbox_entries(include_dead, limit).await
    }

    async fn pending_mirror_count(&self) -> Result<i64> {
        self.inner.pending_mirror_count().await
    }
}

// ===== Helpers =====

fn immediate_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    }
}

fn coordinator(
    primary: Arc<dyn PrimaryStore>,
    secondary: &Arc<FlakySecondary>,
    outbox: Option<RetryPolicy>,
) -> Arc<DualWriteCoordinator> {
    let secondary: Arc<dyn StoreAdapter> = secondary.clone();
    let policy = WritePolicy {
        primary_timeout: Duration::from_millis(500),
        secondary_timeout: Duration::from_millis(300),
        outbox,
    };
    Arc::new(DualWriteCoordinator::new(primary, Some(secondary), policy))
}

fn in_memory() -> Arc<SqlitePrimary> {
    Arc::new(SqlitePrimary::open_in_memory().unwrap())
}

async fn drain_until_idle(coordinator: &DualWriteCoordinator) {
    for _ in 0..20 {
        if coordinator.drain_outbox(10).await.unwrap().is_idle() {
            return;
        }
    }
    panic!("outbox never drained");
}

// ===== Session reuse and creation =====

#[tokio::test]
async fn test_consecutive_resolves_reuse_the_session() {
    let secondary = Arc::new(FlakySecondary::default());
    let resolver = SessionResolver::new(coordinator(in_memory(), &secondary, None));

    let first = resolver.resolve("+5511", Channel::Chat, Some("Ana"), None).await.unwrap();
    let second = resolver.resolve("+5511", Channel::Chat, Some("Ana"), None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(secondary.log(), vec!["session:r1:+5511".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_contact_creates_one_session() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Arc::new(SqlitePrimary::open(&dir.path().join("sessions.db"), 8).unwrap());
    let secondary = Arc::new(FlakySecondary::default());
    let resolver = Arc::new(SessionResolver::new(coordinator(primary.clone(), &secondary, None)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let resolver = resolver.clone();
        handles.push(tokio::spawn(async move {
            resolver.resolve("+5599", Channel::WhatsApp, None, None).await.unwrap()
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    // The store enforces the same thing without the coordinator's lock.
    let mut inserts = Vec::new();
    for _ in 0..8 {
        let primary = primary.clone();
        inserts.push(tokio::spawn(async move {
            primary
                .insert_session(&SessionDraft::new("+5577", Channel::Chat))
                .await
                .unwrap()
        }));
    }
    let mut created = 0;
    let mut winners = Vec::new();
    for insert in inserts {
        let insert = insert.await.unwrap();
        if insert.created {
            created += 1;
        }
        winners.push(insert.id);
    }
    winners.dedup();
    assert_eq!(created, 1);
    assert_eq!(winners.len(), 1);

    let stats = primary.session_stats().await.unwrap();
    assert_eq!(stats.active_sessions, 2);
    assert_eq!(secondary.log().len(), 1);
}

// ===== Primary authority =====

#[tokio::test]
async fn test_secondary_failure_keeps_primary_result() {
    let primary = in_memory();
    let secondary = FlakySecondary::failing();
    let coordinator = coordinator(primary.clone(), &secondary, None);
    let resolver = SessionResolver::new(coordinator.clone());

    let session = resolver.resolve("+5511", Channel::Chat, None, None).await.unwrap();
    let stored = primary.session(&session).await.unwrap().unwrap();
    assert_eq!(stored.id, session);

    let outcome = coordinator
        .apply(WriteOp::InsertMessage {
            session_id: session.clone(),
            draft: MessageDraft::from_user("+5511", "oi"),
        })
        .await
        .unwrap();
    assert_eq!(outcome.mirror, MirrorStatus::Failed);

    let messages = primary.recent_messages(&session, 10).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id.as_str(), outcome.primary_id);
    assert!(secondary.calls() > 0);
    assert_eq!(primary.pending_mirror_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_primary_failure_never_reaches_secondary() {
    let inner = SqlitePrimary::open_in_memory().unwrap();
    let existing = inner
        .insert_session(&SessionDraft::new("+5522", Channel::Chat))
        .await
        .unwrap();
    let primary = Arc::new(BrokenPrimary {
        inner,
        breakage: Breakage::Fail,
    });
    let secondary = Arc::new(FlakySecondary::default());
    let coordinator = coordinator(primary, &secondary, Some(RetryPolicy::default()));
    let resolver = SessionResolver::new(coordinator.clone());

    let err = resolver.resolve("+5511", Channel::Chat, None, None).await.unwrap_err();
    assert!(matches!(err, SyncError::PrimaryUnavailable { operation: "create_session", .. }));

    let err = coordinator
        .save_message(&SessionId::new(existing.id), MessageDraft::from_user("+5522", "oi"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PrimaryUnavailable { operation: "insert_message", .. }));

    let activities = ActivitySyncService::new(coordinator.clone());
    let err = activities
        .create(ActivityInput::new("2024-03-10", "Corrida", "fitness"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PrimaryUnavailable { .. }));

    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn test_primary_timeout_is_fatal() {
    let primary = Arc::new(BrokenPrimary {
        inner: SqlitePrimary::open_in_memory().unwrap(),
        breakage: Breakage::Hang,
    });
    let secondary = Arc::new(FlakySecondary::default());
    let resolver = SessionResolver::new(coordinator(primary, &secondary, None));

    let err = resolver.resolve("+5511", Channel::Chat, None, None).await.unwrap_err();
    assert!(matches!(err, SyncError::PrimaryUnavailable { .. }));
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn test_slow_secondary_times_out_and_is_queued() {
    let primary = in_memory();
    let secondary = Arc::new(FlakySecondary::default());
    secondary.slow.store(true, Ordering::SeqCst);
    let coordinator = coordinator(primary.clone(), &secondary, Some(immediate_retries(3)));

    let outcome = coordinator
        .apply(WriteOp::CreateSession(SessionDraft::new("+5511", Channel::Chat)))
        .await
        .unwrap();
    assert!(matches!(outcome.mirror, MirrorStatus::Deferred { .. }));
    assert!(primary.session(&SessionId::new(outcome.primary_id)).await.unwrap().is_some());
}

// ===== Ordering and replay =====

#[tokio::test]
async fn test_replay_preserves_insertion_order() {
    let primary = in_memory();
    let secondary = Arc::new(FlakySecondary::default());
    let coordinator = coordinator(primary, &secondary, None);
    let resolver = SessionResolver::new(coordinator.clone());
    let replayer = HistoryReplayer::new(coordinator.clone(), 20);

    let session = resolver.resolve("+5511", Channel::WhatsApp, None, None).await.unwrap();
    coordinator.save_message(&session, MessageDraft::from_user("+5511", "M1")).await.unwrap();
    coordinator.save_message(&session, MessageDraft::from_agent("agent", "M2")).await.unwrap();
    coordinator.save_message(&session, MessageDraft::from_user("+5511", "M3")).await.unwrap();

    let turns = replayer.replay("+5511", Channel::WhatsApp, 10).await.unwrap();
    let summary: Vec<(TurnRole, &str)> = turns.iter().map(|t| (t.role, t.content.as_str())).collect();
    assert_eq!(
        summary,
        vec![(TurnRole::User, "M1"), (TurnRole::Agent, "M2"), (TurnRole::User, "M3")]
    );

    let remote = secondary.log();
    assert_eq!(remote[1..], ["message:r1:M1", "message:r1:M2", "message:r1:M3"]);
}

#[tokio::test]
async fn test_unknown_contact_replays_nothing() {
    let secondary = Arc::new(FlakySecondary::default());
    let replayer = HistoryReplayer::new(coordinator(in_memory(), &secondary, None), 20);

    let turns = replayer.replay("+5500", Channel::Chat, 10).await.unwrap();
    assert!(turns.is_empty());
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn test_first_contact_with_mirror_down() {
    let primary = in_memory();
    let secondary = FlakySecondary::failing();
    let coordinator = coordinator(primary, &secondary, None);
    let resolver = SessionResolver::new(coordinator.clone());
    let replayer = HistoryReplayer::new(coordinator.clone(), 20);

    let session = resolver.resolve("+550000000", Channel::Chat, None, None).await.unwrap();
    coordinator
        .save_message(&session, MessageDraft::from_user("+550000000", "oi"))
        .await
        .unwrap();
    coordinator
        .save_message(&session, MessageDraft::from_agent("agent", "Olá!"))
        .await
        .unwrap();

    let turns = replayer.replay("+550000000", Channel::Chat, 10).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, TurnRole::User);
    assert_eq!(turns[0].content, "oi");
    assert_eq!(turns[1].role, TurnRole::Agent);
    assert_eq!(turns[1].content, "Olá!");
}

// ===== Outbox =====

#[tokio::test]
async fn test_outbox_redelivers_in_session_order() {
    let primary = in_memory();
    let secondary = FlakySecondary::failing();
    let coordinator = coordinator(primary.clone(), &secondary, Some(immediate_retries(5)));
    let resolver = SessionResolver::new(coordinator.clone());

    let session = resolver.resolve("+550000000", Channel::Chat, None, None).await.unwrap();
    let first = coordinator
        .apply(WriteOp::InsertMessage {
            session_id: session.clone(),
            draft: MessageDraft::from_user("+550000000", "oi"),
        })
        .await
        .unwrap();
    assert!(matches!(first.mirror, MirrorStatus::Deferred { .. }));

    // Mirror recovers, but the next turn must not overtake the queued ones.
    secondary.set_failing(false);
    let calls_before = secondary.calls();
    let second = coordinator
        .apply(WriteOp::InsertMessage {
            session_id: session.clone(),
            draft: MessageDraft::from_agent("agent", "Olá!"),
        })
        .await
        .unwrap();
    assert!(matches!(second.mirror, MirrorStatus::Deferred { .. }));
    assert_eq!(secondary.calls(), calls_before);
    assert_eq!(primary.pending_mirror_count().await.unwrap(), 3);

    drain_until_idle(&coordinator).await;

    assert_eq!(
        secondary.log(),
        vec![
            "session:r1:+550000000".to_string(),
            "message:r1:oi".to_string(),
            "message:r1:Olá!".to_string(),
        ]
    );
    assert_eq!(primary.pending_mirror_count().await.unwrap(), 0);
    assert_eq!(
        primary.linked(LinkKind::Session, session.as_str()).await.unwrap().as_deref(),
        Some("r1")
    );
}

#[tokio::test]
async fn test_outbox_entry_dies_after_max_attempts() {
    let primary = in_memory();
    let secondary = FlakySecondary::failing();
    let coordinator = coordinator(primary.clone(), &secondary, Some(immediate_retries(2)));

    let outcome = coordinator
        .apply(WriteOp::UpsertActivity(ActivityWrite::Create(
            ActivityInput::new("2024-03-10", "Corrida", "fitness").into_draft().unwrap(),
        )))
        .await
        .unwrap();
    assert!(matches!(outcome.mirror, MirrorStatus::Deferred { .. }));

    let report = coordinator.drain_outbox(10).await.unwrap();
    assert_eq!(report.dead, 1);
    assert_eq!(report.delivered, 0);

    assert_eq!(primary.pending_mirror_count().await.unwrap(), 0);
    let entries = primary.outbox_entries(true, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].dead);
    assert_eq!(entries[0].attempts, 2);
    assert_eq!(entries[0].last_error.as_deref(), Some("secondary unavailable"));

    assert!(coordinator.drain_outbox(10).await.unwrap().is_idle());
}

// ===== Activities =====

#[tokio::test]
async fn test_activity_mirror_falls_back_to_natural_key_then_links() {
    let primary = in_memory();
    let secondary = FlakySecondary::failing();
    let coordinator = coordinator(primary.clone(), &secondary, None);
    let service = ActivitySyncService::new(coordinator);

    let id = service
        .create(ActivityInput::new("2024-03-10", "Corrida", "fitness").with_times("06:00", "07:00"))
        .await
        .unwrap();
    assert_eq!(primary.linked(LinkKind::Activity, id.as_str()).await.unwrap(), None);

    // Seed the mirror as if the row had reached it some other way.
    secondary.set_failing(false);
    let draft = primary.activity(&id).await.unwrap().unwrap().to_draft();
    secondary.insert_activity(&draft).await.unwrap();

    service
        .update(
            &id,
            ActivityChanges {
                category: Some("pessoal".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        primary.linked(LinkKind::Activity, id.as_str()).await.unwrap().as_deref(),
        Some("r1")
    );

    service.delete(&id).await.unwrap();
    assert!(primary.activity(&id).await.unwrap().is_none());

    let log = secondary.log();
    assert_eq!(
        log,
        vec![
            "activity:create:r1".to_string(),
            "activity:update:key:r1".to_string(),
            "activity:delete:id:r1".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_deferred_activity_create_is_not_overtaken() {
    let primary = in_memory();
    let secondary = FlakySecondary::failing();
    let coordinator = coordinator(primary.clone(), &secondary, Some(immediate_retries(5)));
    let service = ActivitySyncService::new(coordinator.clone());

    let id = service
        .create(ActivityInput::new("2024-03-10", "Corrida", "fitness").with_times("06:00", "07:00"))
        .await
        .unwrap();
    assert_eq!(primary.pending_mirror_count().await.unwrap(), 1);

    // Mirror recovers; later writes for the same activity wait for the create.
    secondary.set_failing(false);
    let calls_before = secondary.calls();
    service
        .update(
            &id,
            ActivityChanges {
                category: Some("pessoal".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    service.delete(&id).await.unwrap();
    assert_eq!(secondary.calls(), calls_before);
    assert_eq!(primary.pending_mirror_count().await.unwrap(), 3);

    drain_until_idle(&coordinator).await;

    assert!(primary.activity(&id).await.unwrap().is_none());
    assert_eq!(
        secondary.log(),
        vec![
            "activity:create:r1".to_string(),
            "activity:update:id:r1".to_string(),
            "activity:delete:id:r1".to_string(),
        ]
    );
    assert!(secondary.activities.lock().unwrap().is_empty());
    assert_eq!(primary.pending_mirror_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_activity_fails_before_any_write() {
    let primary = in_memory();
    let secondary = Arc::new(FlakySecondary::default());
    let service = ActivitySyncService::new(coordinator(primary.clone(), &secondary, None));

    let err = service
        .create(ActivityInput::new("2024-03-10", "Corrida", "fitness").with_times("7h", "8h"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(secondary.calls(), 0);
}
