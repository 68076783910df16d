//! ASCOM client session tracking
//!
//! Sessions are keyed by the (Alpaca ClientID, device) pair: one client
//! application routinely drives several devices under a single ClientID, and
//! each pairing is its own session. The in-memory map is the source of
//! truth; the database is a mirror updated by a single writer task that
//! consumes snapshots in FIFO order, which serializes writes per session and
//! makes a write-after-close impossible once the session leaves the map.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{Error, Result};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "idle" => Ok(Self::Idle),
            "closed" => Ok(Self::Closed),
            other => Err(Error::Validation(format!("unknown session status '{}'", other))),
        }
    }
}

/// One tracked client session
#[derive(Debug, Clone)]
pub struct AscomSession {
    pub session_id: Uuid,
    pub client_id: i32,
    pub client_name: String,
    pub client_version: String,
    pub client_ip: String,
    pub device_id: Uuid,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub telescope_session_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub total_commands: i64,
    pub total_queries: i64,
    pub ended_at: Option<DateTime<Utc>>,
}

impl AscomSession {
    fn new(client_id: i32, name: &str, version: &str, ip: &str, device_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            client_id,
            client_name: name.to_string(),
            client_version: version.to_string(),
            client_ip: ip.to_string(),
            device_id,
            user_id: None,
            username: None,
            telescope_session_id: None,
            started_at: now,
            last_activity_at: now,
            status: SessionStatus::Active,
            total_commands: 0,
            total_queries: 0,
            ended_at: None,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    device_id: Uuid,
    client_id: i32,
    client_name: String,
    client_version: String,
    client_ip_address: String,
    started_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    status: String,
    user_id: Option<String>,
    telescope_session_id: Option<Uuid>,
    total_commands: i64,
    total_queries: i64,
    ended_at: Option<DateTime<Utc>>,
}

impl TryFrom<SessionRow> for AscomSession {
    type Error = Error;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Self {
            session_id: row.id,
            client_id: row.client_id,
            client_name: row.client_name,
            client_version: row.client_version,
            client_ip: row.client_ip_address,
            device_id: row.device_id,
            user_id: row.user_id,
            username: None,
            telescope_session_id: row.telescope_session_id,
            started_at: row.started_at,
            last_activity_at: row.last_activity_at,
            status: SessionStatus::parse(&row.status)?,
            total_commands: row.total_commands,
            total_queries: row.total_queries,
            ended_at: row.ended_at,
        })
    }
}

/// Concurrent session tracker with a database mirror
pub struct SessionManager {
    sessions: DashMap<(i32, Uuid), Arc<RwLock<AscomSession>>>,
    pool: PgPool,
    config: SessionConfig,
    writer: mpsc::UnboundedSender<AscomSession>,
    cancel: CancellationToken,
}

impl SessionManager {
    pub fn new(pool: PgPool, config: SessionConfig) -> Arc<Self> {
        let (writer, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            sessions: DashMap::new(),
            pool: pool.clone(),
            config,
            writer,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(writer_loop(pool, rx));

        let sweeper = Arc::clone(&manager);
        tokio::spawn(async move { sweeper.sweeper_loop().await });

        manager
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Fetch or create the session for a client hitting a device
    ///
    /// Memory hit touches activity; a non-closed database row is restored;
    /// otherwise a fresh session is created in memory and mirrored. Two
    /// concurrent calls for the same (client, device) pair converge on one
    /// session id.
    pub async fn get_or_create_session(
        &self,
        client_id: i32,
        client_name: &str,
        client_version: &str,
        client_ip: &str,
        device_id: Uuid,
    ) -> Result<Arc<RwLock<AscomSession>>> {
        let existing = self
            .sessions
            .get(&(client_id, device_id))
            .map(|guard| Arc::clone(guard.value()));
        if let Some(entry) = existing {
            {
                let mut session = entry.write().await;
                session.last_activity_at = Utc::now();
                session.status = SessionStatus::Active;
                self.persist(&session);
            }
            return Ok(entry);
        }

        // Memory miss: try to restore the most recent open row
        let restored: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, device_id, client_id, client_name, client_version,
                   client_ip_address, started_at, last_activity_at, status,
                   user_id, telescope_session_id, total_commands, total_queries,
                   ended_at
            FROM ascom_sessions
            WHERE client_id = $1 AND device_id = $2 AND status != 'closed'
            ORDER BY last_activity_at DESC
            LIMIT 1
            "#,
        )
        .bind(client_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        let mut candidate = match restored {
            Some(row) => {
                let mut session = AscomSession::try_from(row)?;
                session.last_activity_at = Utc::now();
                session.status = SessionStatus::Active;
                session
            }
            None => AscomSession::new(client_id, client_name, client_version, client_ip, device_id),
        };

        // Concurrent creators race here; the map entry decides the winner and
        // the loser's candidate is discarded unwritten
        match self.sessions.entry((client_id, device_id)) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let existing = Arc::clone(entry.get());
                let mut session = existing.write().await;
                session.last_activity_at = Utc::now();
                session.status = SessionStatus::Active;
                self.persist(&session);
                drop(session);
                Ok(existing)
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                candidate.last_activity_at = Utc::now();
                self.persist(&candidate);
                let stored = Arc::new(RwLock::new(candidate));
                entry.insert(Arc::clone(&stored));
                Ok(stored)
            }
        }
    }

    /// Attach the authenticated user to a session
    pub async fn link_session_to_user(
        &self,
        client_id: i32,
        device_id: Uuid,
        user_id: &str,
        username: Option<&str>,
    ) -> Result<()> {
        self.mutate(client_id, device_id, |session| {
            session.user_id = Some(user_id.to_string());
            session.username = username.map(str::to_string);
        })
        .await
    }

    /// Attach a telescope engine session
    pub async fn link_session_to_telescope(
        &self,
        client_id: i32,
        device_id: Uuid,
        telescope_session_id: Uuid,
    ) -> Result<()> {
        self.mutate(client_id, device_id, |session| {
            session.telescope_session_id = Some(telescope_session_id);
        })
        .await
    }

    /// Count a PUT/command against the session
    pub async fn record_command(&self, client_id: i32, device_id: Uuid) -> Result<()> {
        self.mutate(client_id, device_id, |session| {
            session.total_commands += 1;
        })
        .await
    }

    /// Count a GET/query against the session
    pub async fn record_query(&self, client_id: i32, device_id: Uuid) -> Result<()> {
        self.mutate(client_id, device_id, |session| {
            session.total_queries += 1;
        })
        .await
    }

    /// Close a session explicitly and drop it from memory
    pub async fn end_session(&self, client_id: i32, device_id: Uuid) -> Result<()> {
        let Some((_, entry)) = self.sessions.remove(&(client_id, device_id)) else {
            return Err(Error::NotFound(format!(
                "no session for client {} on device {}",
                client_id, device_id
            )));
        };

        let mut session = entry.write().await;
        session.status = SessionStatus::Closed;
        session.ended_at = Some(Utc::now());
        self.persist(&session);
        Ok(())
    }

    async fn mutate<F>(&self, client_id: i32, device_id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut AscomSession),
    {
        // The map guard is released before the per-session lock is taken
        let Some(entry) = self
            .sessions
            .get(&(client_id, device_id))
            .map(|guard| Arc::clone(guard.value()))
        else {
            return Err(Error::NotFound(format!(
                "no session for client {} on device {}",
                client_id, device_id
            )));
        };

        let mut session = entry.write().await;
        apply(&mut session);
        session.last_activity_at = Utc::now();
        self.persist(&session);
        Ok(())
    }

    /// Enqueue a snapshot for the writer task (fire-and-forget)
    fn persist(&self, session: &AscomSession) {
        if self.writer.send(session.clone()).is_err() {
            tracing::warn!(
                session_id = %session.session_id,
                "session writer is gone; dropping mirror update"
            );
        }
    }

    async fn sweeper_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            self.sweep_once(Utc::now()).await;
        }
    }

    /// One sweeper pass; separated for tests
    ///
    /// active and idle past the timeout goes idle; idle past twice the
    /// timeout closes and leaves memory.
    pub(crate) async fn sweep_once(&self, now: DateTime<Utc>) {
        let timeout = chrono::Duration::from_std(self.config.session_timeout())
            .unwrap_or_else(|_| chrono::Duration::seconds(1800));

        let keys: Vec<(i32, Uuid)> = self.sessions.iter().map(|e| *e.key()).collect();

        for key in keys {
            let Some(entry) = self
                .sessions
                .get(&key)
                .map(|guard| Arc::clone(guard.value()))
            else {
                continue;
            };

            let (client_id, device_id) = key;
            let mut session = entry.write().await;
            let idle_for = now - session.last_activity_at;

            match session.status {
                SessionStatus::Active if idle_for > timeout => {
                    session.status = SessionStatus::Idle;
                    self.persist(&session);
                    tracing::debug!(client_id, %device_id, "session went idle");
                }
                SessionStatus::Idle if idle_for > timeout * 2 => {
                    session.status = SessionStatus::Closed;
                    session.ended_at = Some(now);
                    self.persist(&session);
                    drop(session);
                    self.sessions.remove(&key);
                    tracing::info!(client_id, %device_id, "idle session closed");
                }
                _ => {}
            }
        }
    }
}

/// Single consumer mirroring session snapshots into the database
async fn writer_loop(pool: PgPool, mut rx: mpsc::UnboundedReceiver<AscomSession>) {
    while let Some(session) = rx.recv().await {
        let result = sqlx::query(
            r#"
            INSERT INTO ascom_sessions (
                id, device_id, client_id, client_name, client_version,
                client_ip_address, started_at, last_activity_at, status,
                user_id, telescope_session_id, total_commands, total_queries,
                ended_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                last_activity_at = EXCLUDED.last_activity_at,
                status = EXCLUDED.status,
                user_id = EXCLUDED.user_id,
                telescope_session_id = EXCLUDED.telescope_session_id,
                total_commands = EXCLUDED.total_commands,
                total_queries = EXCLUDED.total_queries,
                ended_at = EXCLUDED.ended_at
            "#,
        )
        .bind(session.session_id)
        .bind(session.device_id)
        .bind(session.client_id)
        .bind(&session.client_name)
        .bind(&session.client_version)
        .bind(&session.client_ip)
        .bind(session.started_at)
        .bind(session.last_activity_at)
        .bind(session.status.as_str())
        .bind(&session.user_id)
        .bind(session.telescope_session_id)
        .bind(session.total_commands)
        .bind(session.total_queries)
        .bind(session.ended_at)
        .execute(&pool)
        .await;

        if let Err(e) = result {
            tracing::error!(
                session_id = %session.session_id,
                "session mirror write failed: {}", e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn lazy_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://bigskies@localhost/bigskies")
            .unwrap()
    }

    fn manager() -> Arc<SessionManager> {
        SessionManager::new(
            lazy_pool(),
            SessionConfig {
                session_timeout_secs: 60,
                cleanup_interval_secs: 300,
            },
        )
    }

    async fn seed(
        manager: &SessionManager,
        client_id: i32,
        device_id: Uuid,
    ) -> Arc<RwLock<AscomSession>> {
        let session = AscomSession::new(client_id, "NINA", "3.1", "10.0.0.5", device_id);
        let entry = Arc::new(RwLock::new(session));
        manager
            .sessions
            .insert((client_id, device_id), Arc::clone(&entry));
        entry
    }

    #[tokio::test]
    async fn test_counters_are_monotone() {
        let m = manager();
        let device = Uuid::new_v4();
        seed(&m, 7, device).await;

        m.record_command(7, device).await.unwrap();
        m.record_command(7, device).await.unwrap();
        m.record_query(7, device).await.unwrap();

        let entry = m.sessions.get(&(7, device)).unwrap().value().clone();
        let session = entry.read().await;
        assert_eq!(session.total_commands, 2);
        assert_eq!(session.total_queries, 1);
    }

    #[tokio::test]
    async fn test_activity_advances_on_mutation() {
        let m = manager();
        let device = Uuid::new_v4();
        let entry = seed(&m, 7, device).await;

        let before = entry.read().await.last_activity_at;
        tokio::time::sleep(Duration::from_millis(5)).await;
        m.record_query(7, device).await.unwrap();

        assert!(entry.read().await.last_activity_at > before);
    }

    #[tokio::test]
    async fn test_link_user_and_telescope() {
        let m = manager();
        let device = Uuid::new_v4();
        let entry = seed(&m, 7, device).await;

        m.link_session_to_user(7, device, "u1", Some("alice")).await.unwrap();
        let telescope_session = Uuid::new_v4();
        m.link_session_to_telescope(7, device, telescope_session)
            .await
            .unwrap();

        let session = entry.read().await;
        assert_eq!(session.user_id.as_deref(), Some("u1"));
        assert_eq!(session.username.as_deref(), Some("alice"));
        assert_eq!(session.telescope_session_id, Some(telescope_session));
    }

    #[tokio::test]
    async fn test_mutation_on_unknown_session_fails() {
        let m = manager();
        let device = Uuid::new_v4();
        assert!(m.record_command(99, device).await.is_err());
        assert!(m.link_session_to_user(99, device, "u1", None).await.is_err());
    }

    #[tokio::test]
    async fn test_sessions_are_per_device() {
        let m = manager();
        let telescope = Uuid::new_v4();
        let camera = Uuid::new_v4();
        let scope_entry = seed(&m, 7, telescope).await;
        let camera_entry = seed(&m, 7, camera).await;

        // One ClientID, two devices, two independent sessions
        assert_ne!(
            scope_entry.read().await.session_id,
            camera_entry.read().await.session_id
        );

        m.record_command(7, telescope).await.unwrap();
        assert_eq!(scope_entry.read().await.total_commands, 1);
        assert_eq!(camera_entry.read().await.total_commands, 0);

        // Mutating one device never touches the other's session
        m.link_session_to_user(7, camera, "u1", None).await.unwrap();
        assert!(scope_entry.read().await.user_id.is_none());
        assert_eq!(camera_entry.read().await.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_end_session_removes_from_memory() {
        let m = manager();
        let device = Uuid::new_v4();
        let entry = seed(&m, 7, device).await;

        m.end_session(7, device).await.unwrap();
        assert!(m.sessions.get(&(7, device)).is_none());

        let session = entry.read().await;
        assert_eq!(session.status, SessionStatus::Closed);
        assert!(session.ended_at.is_some());

        // Ending twice is an error: the session is gone
        assert!(m.end_session(7, device).await.is_err());
    }

    #[tokio::test]
    async fn test_sweeper_transitions() {
        let m = manager();
        let device = Uuid::new_v4();
        let entry = seed(&m, 7, device).await;

        // Not yet idle
        m.sweep_once(Utc::now()).await;
        assert_eq!(entry.read().await.status, SessionStatus::Active);

        // Past the timeout: active -> idle
        let later = Utc::now() + chrono::Duration::seconds(61);
        m.sweep_once(later).await;
        assert_eq!(entry.read().await.status, SessionStatus::Idle);

        // Past twice the timeout: idle -> closed, leaves memory
        let much_later = Utc::now() + chrono::Duration::seconds(125);
        m.sweep_once(much_later).await;
        assert_eq!(entry.read().await.status, SessionStatus::Closed);
        assert!(m.sessions.get(&(7, device)).is_none());
    }

    #[tokio::test]
    async fn test_fresh_activity_resets_idle() {
        let m = manager();
        let device = Uuid::new_v4();
        let entry = seed(&m, 7, device).await;

        let later = Utc::now() + chrono::Duration::seconds(61);
        m.sweep_once(later).await;
        assert_eq!(entry.read().await.status, SessionStatus::Idle);

        // A touch through get_or_create flips it back to active
        let again = m
            .get_or_create_session(7, "NINA", "3.1", "10.0.0.5", device)
            .await
            .unwrap();
        assert_eq!(again.read().await.status, SessionStatus::Active);

        // Same session object, not a new one
        assert_eq!(
            again.read().await.session_id,
            entry.read().await.session_id
        );
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [SessionStatus::Active, SessionStatus::Idle, SessionStatus::Closed] {
            assert_eq!(SessionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(SessionStatus::parse("zombie").is_err());
    }
}
