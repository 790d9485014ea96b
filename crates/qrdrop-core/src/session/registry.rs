//! Session registry.
//!
//! Two concurrent tables: `active` for sessions still collecting chunks and
//! `finished` for terminal ones. Each session sits behind its own async
//! mutex, so frames for different transfers never wait on each other.
//!
//! ## Invariants
//!
//! - At most one session exists per [`SessionId`] across both tables.
//! - A session moves to `finished` before it leaves `active`, so a frame
//!   that races completion still finds it.
//! - Removal from a table happens while holding the session lock and only
//!   if the table still maps the id to the same session.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::{Session, SessionId, SessionSnapshot};
use crate::config::ReceptionConfig;
use crate::error::{Error, Result};
use crate::frame::Frame;

/// A session shared between the registry and in-flight frames.
pub type SharedSession = Arc<Mutex<Session>>;

/// Ceilings checked before a session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Largest declared chunk count
    pub max_chunks: usize,
    /// Largest declared file size
    pub max_file_size: u64,
    /// Most sessions receiving at once
    pub max_active_sessions: usize,
}

impl From<&ReceptionConfig> for SessionLimits {
    fn from(config: &ReceptionConfig) -> Self {
        Self {
            max_chunks: config.max_chunks,
            max_file_size: config.max_file_size,
            max_active_sessions: config.max_active_sessions,
        }
    }
}

impl SessionLimits {
    fn check_frame(&self, frame: &Frame) -> Result<()> {
        if frame.total > self.max_chunks {
            return Err(Error::Capacity {
                limit: "total chunks",
                requested: frame.total as u64,
                max: self.max_chunks as u64,
            });
        }
        if let Some(size) = frame.meta.size {
            if size > self.max_file_size {
                return Err(Error::Capacity {
                    limit: "file size",
                    requested: size,
                    max: self.max_file_size,
                });
            }
        }
        Ok(())
    }
}

/// Which table a resolved session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Already collecting chunks
    Active,
    /// Terminal; frames are ignored
    Finished,
    /// Created for this frame
    Created,
}

/// Result of [`SessionRegistry::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Session identity
    pub id: SessionId,
    /// The session
    pub session: SharedSession,
    /// Where it came from
    pub origin: Origin,
}

/// Owner of every session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: DashMap<SessionId, SharedSession>,
    finished: DashMap<SessionId, SharedSession>,
    active_count: AtomicUsize,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the session for a frame, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Capacity`] when a new session would exceed a limit.
    /// Nothing is retained in that case.
    pub fn resolve(&self, frame: &Frame, limits: &SessionLimits) -> Result<Resolved> {
        let id = SessionId::derive(frame);

        if let Some(session) = self.active.get(&id).map(|s| Arc::clone(s.value())) {
            return Ok(Resolved {
                id,
                session,
                origin: Origin::Active,
            });
        }
        if let Some(session) = self.finished.get(&id).map(|s| Arc::clone(s.value())) {
            return Ok(Resolved {
                id,
                session,
                origin: Origin::Finished,
            });
        }

        limits.check_frame(frame)?;

        match self.active.entry(id.clone()) {
            Entry::Occupied(entry) => Ok(Resolved {
                id,
                session: Arc::clone(entry.get()),
                origin: Origin::Active,
            }),
            Entry::Vacant(entry) => {
                // Completion inserts into `finished` before leaving `active`.
                if let Some(session) = self.finished.get(&id).map(|s| Arc::clone(s.value())) {
                    return Ok(Resolved {
                        id,
                        session,
                        origin: Origin::Finished,
                    });
                }

                let max = limits.max_active_sessions;
                if self
                    .active_count
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        (n < max).then_some(n + 1)
                    })
                    .is_err()
                {
                    return Err(Error::Capacity {
                        limit: "active sessions",
                        requested: max as u64 + 1,
                        max: max as u64,
                    });
                }

                let session = Arc::new(Mutex::new(Session::new(id.clone(), frame)));
                entry.insert(Arc::clone(&session));
                tracing::info!(
                    session_id = %id,
                    total = frame.total,
                    format = %frame.format,
                    name = frame.meta.name.as_deref().unwrap_or("unknown"),
                    "New reception session"
                );
                Ok(Resolved {
                    id,
                    session,
                    origin: Origin::Created,
                })
            }
        }
    }

    /// Move a session from `active` to `finished`.
    ///
    /// Call while holding the session lock. Returns `false` if the session
    /// was not active.
    pub fn complete(&self, id: &SessionId) -> bool {
        let Some(session) = self.active.get(id).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        self.finished.insert(id.clone(), Arc::clone(&session));
        self.remove_active(id, &session);
        true
    }

    fn remove_active(&self, id: &SessionId, session: &SharedSession) -> bool {
        let removed = self
            .active
            .remove_if(id, |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    /// Delete terminal sessions that finished at least `max_age` ago.
    ///
    /// Returns the number of sessions removed.
    pub async fn evict_finished(&self, max_age: Duration) -> usize {
        let candidates = Self::entries(&self.finished);
        let mut evicted = 0;

        for (id, session) in candidates {
            let guard = session.lock().await;
            let aged = guard.finished_for().is_some_and(|age| age >= max_age);
            if aged
                && self
                    .finished
                    .remove_if(&id, |_, current| Arc::ptr_eq(current, &session))
                    .is_some()
            {
                tracing::debug!(session_id = %id, "Evicted finished session");
                evicted += 1;
            }
            drop(guard);
        }
        evicted
    }

    /// Fail active sessions that saw no frame for `max_idle`.
    ///
    /// Sessions busy reconstructing are skipped. Returns the expired ids.
    pub fn expire_idle(&self, max_idle: Duration) -> Vec<SessionId> {
        let candidates = Self::entries(&self.active);
        let mut expired = Vec::new();

        for (id, session) in candidates {
            let Ok(mut guard) = session.try_lock() else {
                continue;
            };
            if guard.is_terminal() || guard.idle_for() < max_idle {
                continue;
            }
            let idle = guard.idle_for().as_secs();
            guard.fail(Error::SessionExpired(idle).to_string(), Vec::new());
            self.finished.insert(id.clone(), Arc::clone(&session));
            self.remove_active(&id, &session);
            drop(guard);

            tracing::warn!(session_id = %id, idle_secs = idle, "Session timed out");
            expired.push(id);
        }
        expired
    }

    fn entries(table: &DashMap<SessionId, SharedSession>) -> Vec<(SessionId, SharedSession)> {
        table
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Look up a session in either table.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<SharedSession> {
        self.active
            .get(id)
            .or_else(|| self.finished.get(id))
            .map(|s| Arc::clone(s.value()))
    }

    /// Snapshot of one session.
    pub async fn snapshot(&self, id: &SessionId) -> Option<SessionSnapshot> {
        let session = self.get(id)?;
        let guard = session.lock().await;
        Some(guard.snapshot())
    }

    /// Snapshots of all active and finished sessions.
    pub async fn snapshot_all(&self) -> (Vec<SessionSnapshot>, Vec<SessionSnapshot>) {
        let mut active = Vec::new();
        for (_, session) in Self::entries(&self.active) {
            active.push(session.lock().await.snapshot());
        }
        let mut finished = Vec::new();
        for (_, session) in Self::entries(&self.finished) {
            finished.push(session.lock().await.snapshot());
        }
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        finished.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        (active, finished)
    }

    /// Number of sessions still receiving.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Number of terminal sessions retained.
    #[must_use]
    pub fn finished_len(&self) -> usize {
        self.finished.len()
    }
}
