//! SQLite-backed primary store: sessions, messages, activities and the mirror ledger.
pub mod activity_store;
pub mod ledger_store;
pub mod migration;
pub mod session_store;

pub use activity_store::ActivityStore;
pub use ledger_store::MirrorLedger;
pub use migration::MigrationManager;
pub use session_store::SessionStore;

use super::{ActivityTarget, LinkKind, OutboxEntry, PrimaryStore, SessionInsert, StoreAdapter};
use crate::model::{
    ActivityDraft, ActivityId, ActivityPatch, Channel, ContactSession, Message, MessageDraft,
    MessageReceipt, ScheduledActivity, SessionDraft, SessionId, SessionStats,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub type SqlitePool = Pool<SqliteConnectionManager>;

const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

/// Fixed-width UTC encoding so text ordering matches time ordering.
pub(crate) fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at the precision timestamps are stored with.
pub(crate) fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    None
}

pub(crate) fn timestamp_or_now(raw: &str, column: &str) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_else(|| {
        warn!("Failed to parse {}: {:?}", column, raw);
        Utc::now()
    })
}

struct Stores {
    sessions: SessionStore,
    activities: ActivityStore,
    ledger: MirrorLedger,
    pool: Arc<SqlitePool>,
}

impl Drop for Stores {
    fn drop(&mut self) {
        if let Some(conn) = self.pool.try_get() {
            if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
                warn!("WAL checkpoint on close failed: {}", e);
            }
        }
    }
}

/// Cheap to clone; every clone shares one connection pool.
#[derive(Clone)]
pub struct SqlitePrimary {
    inner: Arc<Stores>,
}

impl SqlitePrimary {
    pub fn open(db_path: &Path, pool_size: u32) -> anyhow::Result<Self> {
        info!("Opening primary database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;",
            )?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }

        info!("Primary database initialized successfully");
        Ok(Self::from_pool(pool))
    }

    /// A private in-memory database. Holds a single connection for its whole life.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        let pool = Arc::new(pool);
        Self {
            inner: Arc::new(Stores {
                sessions: SessionStore::new(Arc::clone(&pool)),
                activities: ActivityStore::new(Arc::clone(&pool)),
                ledger: MirrorLedger::new(Arc::clone(&pool)),
                pool,
            }),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    pub fn activities(&self) -> &ActivityStore {
        &self.inner.activities
    }

    pub fn ledger(&self) -> &MirrorLedger {
        &self.inner.ledger
    }

    pub fn table_counts(&self) -> anyhow::Result<Vec<(&'static str, i64)>> {
        let conn = self.inner.pool.get()?;
        Ok(migration::table_counts(&conn)?)
    }

    /// Runs SQLite work off the async executor so callers' timeouts can fire.
    async fn blocking<T, F>(&self, work: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Stores) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || work(&inner))
            .await
            .context("primary store task failed")?
    }
}

fn resolve_activity(stores: &Stores, target: &ActivityTarget) -> anyhow::Result<Option<String>> {
    match target {
        ActivityTarget::Id(id) => Ok(Some(id.clone())),
        ActivityTarget::NaturalKey(key) => stores.activities.find_by_natural_key(key),
    }
}

#[async_trait]
impl StoreAdapter for SqlitePrimary {
    fn label(&self) -> &'static str {
        "primary"
    }

    async fn find_active_session(&self, contact_identity: &str, channel: Channel) -> anyhow::Result<Option<String>> {
        let contact = contact_identity.to_string();
        self.blocking(move |s| s.sessions.find_active(&contact, channel)).await
    }

    async fn insert_session(&self, draft: &SessionDraft) -> anyhow::Result<SessionInsert> {
        let draft = draft.clone();
        self.blocking(move |s| s.sessions.insert_active(&draft)).await
    }

    async fn end_session(&self, session_ref: &str) -> anyhow::Result<bool> {
        let id = session_ref.to_string();
        self.blocking(move |s| s.sessions.end(&id)).await
    }

    async fn insert_message(&self, session_ref: &str, draft: &MessageDraft) -> anyhow::Result<MessageReceipt> {
        let session_id = session_ref.to_string();
        let draft = draft.clone();
        self.blocking(move |s| s.sessions.append_message(&session_id, &draft)).await
    }

    async fn insert_activity(&self, draft: &ActivityDraft) -> anyhow::Result<String> {
        let draft = draft.clone();
        self.blocking(move |s| s.activities.insert(&draft)).await
    }

    async fn update_activity(&self, target: &ActivityTarget, patch: &ActivityPatch) -> anyhow::Result<Option<String>> {
        let target = target.clone();
        let patch = patch.clone();
        self.blocking(move |s| match resolve_activity(s, &target)? {
            Some(id) if s.activities.update(&id, &patch)? => Ok(Some(id)),
            _ => Ok(None),
        })
        .await
    }

    async fn delete_activity(&self, target: &ActivityTarget) -> anyhow::Result<bool> {
        let target = target.clone();
        self.blocking(move |s| match resolve_activity(s, &target)? {
            Some(id) => s.activities.delete(&id),
            None => Ok(false),
        })
        .await
    }
}

#[async_trait]
impl PrimaryStore for SqlitePrimary {
    async fn session(&self, id: &SessionId) -> anyhow::Result<Option<ContactSession>> {
        let id = id.clone();
        self.blocking(move |s| s.sessions.get(id.as_str())).await
    }

    async fn contact_sessions(&self, contact_identity: &str, channel: Option<Channel>) -> anyhow::Result<Vec<ContactSession>> {
        let contact = contact_identity.to_string();
        self.blocking(move |s| s.sessions.for_contact(&contact, channel)).await
    }

    async fn active_sessions(&self, limit: u32) -> anyhow::Result<Vec<ContactSession>> {
        self.blocking(move |s| s.sessions.active(limit)).await
    }

    async fn recent_messages(&self, session: &SessionId, limit: u32) -> anyhow::Result<Vec<Message>> {
        let session = session.clone();
        self.blocking(move |s| s.sessions.recent_messages(session.as_str(), limit)).await
    }

    async fn activity(&self, id: &ActivityId) -> anyhow::Result<Option<ScheduledActivity>> {
        let id = id.clone();
        self.blocking(move |s| s.activities.get(id.as_str())).await
    }

    async fn session_stats(&self) -> anyhow::Result<SessionStats> {
        self.blocking(|s| s.sessions.stats()).await
    }

    async fn link(&self, kind: LinkKind, primary_id: &str, secondary_id: &str) -> anyhow::Result<()> {
        let primary_id = primary_id.to_string();
        let secondary_id = secondary_id.to_string();
        self.blocking(move |s| s.ledger.link(kind, &primary_id, &secondary_id)).await
    }

    async fn linked(&self, kind: LinkKind, primary_id: &str) -> anyhow::Result<Option<String>> {
        let primary_id = primary_id.to_string();
        self.blocking(move |s| s.ledger.linked(kind, &primary_id)).await
    }

    async fn enqueue_mirror(
        &self,
        operation: &str,
        session_key: Option<&str>,
        payload: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> anyhow::Result<i64> {
        let operation = operation.to_string();
        let session_key = session_key.map(str::to_string);
        let payload = payload.to_string();
        let error = error.to_string();
        self.blocking(move |s| {
            s.ledger
                .enqueue(&operation, session_key.as_deref(), &payload, &error, next_attempt_at)
        })
        .await
    }

    async fn has_pending_mirrors(&self, session_key: &str) -> anyhow::Result<bool> {
        let session_key = session_key.to_string();
        self.blocking(move |s| s.ledger.has_pending(&session_key)).await
    }

    async fn due_mirrors(&self, now: DateTime<Utc>, limit: u32) -> anyhow::Result<Vec<OutboxEntry>> {
        self.blocking(move |s| s.ledger.due(now, limit)).await
    }

    async fn complete_mirror(&self, id: i64) -> anyhow::Result<()> {
        self.blocking(move |s| s.ledger.complete(id)).await
    }

    async fn reschedule_mirror(&self, id: i64, error: &str, next_attempt_at: DateTime<Utc>, dead: bool) -> anyhow::Result<()> {
        let error = error.to_string();
        self.blocking(move |s| s.ledger.reschedule(id, &error, next_attempt_at, dead)).await
    }

    async fn outbox_entries(&self, include_dead: bool, limit: u32) -> anyhow::Result<Vec<OutboxEntry>> {
        self.blocking(move |s| s.ledger.list(include_dead, limit)).await
    }

    async fn pending_mirror_count(&self) -> anyhow::Result<i64> {
        self.blocking(|s| s.ledger.pending_count()).await
    }
}
