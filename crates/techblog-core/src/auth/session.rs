use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::credentials::CredentialStore;
use super::events::{SessionEvent, SessionEvents, SignOutReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }
}

/// Who is logged in, as reported by the last login/registration response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl UserIdentity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A bearer token together with the identity it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user: UserIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Anonymous,
    Authenticated,
}

struct SessionState {
    current: Option<Session>,
    /// Advances on every transition; identifies the session a request ran under.
    generation: u64,
    /// An ended session's credentials could not be removed from the store
    store_stale: bool,
}

/// The single owner of session state.
///
/// Every transition holds the write lock across the credential store write and
/// the in-memory update, so readers never see the two disagree.
pub struct SessionManager {
    store: CredentialStore,
    state: RwLock<SessionState>,
    events: SessionEvents,
}

impl SessionManager {
    /// Build the manager from whatever the credential store holds.
    pub fn new(store: CredentialStore) -> Self {
        let current = store.load();
        if current.is_none() && store.has_entries() {
            // A half pair or corrupted identity: drop it so store and state agree
            warn!("Discarding unusable stored credentials");
            if let Err(e) = store.clear() {
                warn!(error = %e, "Failed to discard stored credentials");
            }
        }

        let generation = u64::from(current.is_some());
        match current {
            Some(ref session) => info!(username = %session.user.username, "Restored session"),
            None => info!("No stored session"),
        }

        Self {
            store,
            state: RwLock::new(SessionState {
                current,
                generation,
                store_stale: false,
            }),
            events: SessionEvents::new(),
        }
    }

    /// Start a new session from a successful login or registration.
    ///
    /// If persisting fails the previous session stays in effect and the error
    /// is returned.
    pub fn begin(&self, token: String, user: UserIdentity) -> Result<UserIdentity> {
        let mut state = self.state.write();

        if let Err(e) = self.store.save(&token, &user) {
            self.restore_store(state.current.as_ref());
            return Err(e);
        }

        state.generation += 1;
        state.store_stale = false;
        state.current = Some(Session {
            token,
            user: user.clone(),
        });
        info!(username = %user.username, role = user.role.as_str(), "Signed in");
        self.events.emit(SessionEvent::SignedIn {
            generation: state.generation,
            user: user.clone(),
        });
        Ok(user)
    }

    /// User-initiated logout. Returns false when there was no session.
    ///
    /// While anonymous this still retries removing credentials left behind by
    /// a failed clear.
    pub fn logout(&self) -> bool {
        let mut state = self.state.write();
        if state.current.is_none() {
            if state.store_stale {
                state.store_stale = !self.clear_store();
            }
            return false;
        }
        self.end_locked(&mut state, SignOutReason::User);
        true
    }

    /// Server-initiated logout for the session a failed request ran under.
    ///
    /// Takes effect only while that session is still the current one, so any
    /// number of rejections from the same session end it once. Returns whether
    /// this call ended the session.
    pub fn invalidate(&self, generation: u64) -> bool {
        let mut state = self.state.write();
        if state.current.is_none() || state.generation != generation {
            return false;
        }
        self.end_locked(&mut state, SignOutReason::Forced);
        true
    }

    fn end_locked(&self, state: &mut SessionState, reason: SignOutReason) {
        state.store_stale = !self.clear_store();
        state.current = None;
        state.generation += 1;
        info!(?reason, "Signed out");
        self.events.emit(SessionEvent::SignedOut {
            generation: state.generation,
            reason,
        });
    }

    /// Clear the store, retrying once. Returns whether it is now empty.
    fn clear_store(&self) -> bool {
        let result = self.store.clear().or_else(|e| {
            debug!(error = %e, "Retrying credential clear");
            self.store.clear()
        });
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to clear stored credentials; they will be restored on next start");
                false
            }
        }
    }

    /// Whether an ended session's credentials are still in the store.
    pub fn is_store_stale(&self) -> bool {
        self.state.read().store_stale
    }

    fn restore_store(&self, previous: Option<&Session>) {
        let result = match previous {
            Some(session) => self.store.save(&session.token, &session.user),
            None => self.store.clear(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to restore stored credentials");
        }
    }

    // ===== Read access =====

    pub fn current(&self) -> Option<Session> {
        self.state.read().current.clone()
    }

    pub fn token(&self) -> Option<String> {
        self.state.read().current.as_ref().map(|s| s.token.clone())
    }

    pub fn user(&self) -> Option<UserIdentity> {
        self.state.read().current.as_ref().map(|s| s.user.clone())
    }

    /// Token and generation read together, for authorizing one request.
    pub fn authorization(&self) -> Option<(String, u64)> {
        let state = self.state.read();
        state
            .current
            .as_ref()
            .map(|s| (s.token.clone(), state.generation))
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn status(&self) -> SessionStatus {
        if self.is_authenticated() {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Anonymous
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().current.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::auth::credentials::{MemoryBackend, StorageBackend};

    fn user(name: &str) -> UserIdentity {
        UserIdentity {
            username: name.to_string(),
            email: format!("{}@b.com", name),
            role: Role::User,
        }
    }

    /// Backend whose writes always fail
    struct ReadOnlyBackend(MemoryBackend);

    impl StorageBackend for ReadOnlyBackend {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(anyhow::anyhow!("storage is read-only"))
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Err(anyhow::anyhow!("storage is read-only"))
        }
    }

    /// Backend whose removals fail a set number of times
    struct FlakyBackend {
        inner: MemoryBackend,
        failures: AtomicUsize,
    }

    impl FlakyBackend {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemoryBackend::new(),
                failures: AtomicUsize::new(failures),
            }
        }
    }

    impl StorageBackend for FlakyBackend {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set(key, value)
        }
        fn remove(&self, key: &str) -> Result<()> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(anyhow::anyhow!("storage busy"));
            }
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_forced_logout_retries_failed_clear() {
        let backend = Arc::new(FlakyBackend::new(1));
        let manager = SessionManager::new(CredentialStore::new(backend.clone()));
        manager.begin("T1".into(), user("a")).unwrap();

        assert!(manager.invalidate(manager.generation()));
        assert!(!manager.is_store_stale());
        assert!(CredentialStore::new(backend).load().is_none());
    }

    #[test]
    fn test_logout_while_anonymous_finishes_failed_clear() {
        let backend = Arc::new(FlakyBackend::new(2));
        let manager = SessionManager::new(CredentialStore::new(backend.clone()));
        manager.begin("T1".into(), user("a")).unwrap();

        assert!(manager.invalidate(manager.generation()));
        assert_eq!(manager.status(), SessionStatus::Anonymous);
        assert!(manager.is_store_stale());
        assert_eq!(backend.get("token").unwrap().as_deref(), Some("T1"));

        assert!(!manager.logout());
        assert!(!manager.is_store_stale());
        assert!(CredentialStore::new(backend).load().is_none());
    }

    #[test]
    fn test_starts_anonymous_with_empty_store() {
        let manager = SessionManager::new(CredentialStore::in_memory());
        assert_eq!(manager.status(), SessionStatus::Anonymous);
        assert!(manager.token().is_none());
        assert!(manager.user().is_none());
    }

    #[test]
    fn test_restores_stored_session() {
        let backend = Arc::new(MemoryBackend::new());
        CredentialStore::new(backend.clone())
            .save("T1", &user("a"))
            .unwrap();

        let manager = SessionManager::new(CredentialStore::new(backend));
        assert_eq!(manager.status(), SessionStatus::Authenticated);
        assert_eq!(manager.token().as_deref(), Some("T1"));
        assert_eq!(manager.user(), Some(user("a")));
    }

    #[test]
    fn test_corrupted_store_starts_anonymous_and_is_cleaned() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set("token", "T1").unwrap();
        backend.set("user", "garbage").unwrap();

        let manager = SessionManager::new(CredentialStore::new(backend.clone()));
        assert_eq!(manager.status(), SessionStatus::Anonymous);
        assert_eq!(backend.get("token").unwrap(), None);
        assert_eq!(backend.get("user").unwrap(), None);
    }

    #[test]
    fn test_begin_then_logout_leaves_store_empty() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = SessionManager::new(CredentialStore::new(backend.clone()));

        manager.begin("T1".into(), user("a")).unwrap();
        manager.begin("T2".into(), user("b")).unwrap();
        assert_eq!(manager.token().as_deref(), Some("T2"));

        assert!(manager.logout());
        assert_eq!(manager.status(), SessionStatus::Anonymous);
        assert!(CredentialStore::new(backend).load().is_none());
    }

    #[test]
    fn test_logout_when_anonymous_is_noop() {
        let manager = SessionManager::new(CredentialStore::in_memory());
        let mut events = manager.subscribe();
        let generation = manager.generation();

        assert!(!manager.logout());
        assert!(!manager.logout());
        assert_eq!(manager.generation(), generation);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_failed_save_keeps_previous_session() {
        let inner = MemoryBackend::new();
        inner.set("token", "T0").unwrap();
        inner
            .set("user", &serde_json::to_string(&user("a")).unwrap())
            .unwrap();
        let manager = SessionManager::new(CredentialStore::new(Arc::new(ReadOnlyBackend(inner))));
        let generation = manager.generation();

        assert!(manager.begin("T1".into(), user("b")).is_err());
        assert_eq!(manager.token().as_deref(), Some("T0"));
        assert_eq!(manager.user(), Some(user("a")));
        assert_eq!(manager.generation(), generation);
    }

    #[test]
    fn test_invalidate_ends_session_once() {
        let manager = SessionManager::new(CredentialStore::in_memory());
        manager.begin("T1".into(), user("a")).unwrap();
        let mut events = manager.subscribe();
        let (_, generation) = manager.authorization().unwrap();

        assert!(manager.invalidate(generation));
        assert!(!manager.invalidate(generation));
        assert_eq!(manager.status(), SessionStatus::Anonymous);

        let event = events.try_recv().unwrap();
        assert!(event.is_forced_logout());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_invalidate_ignores_older_session() {
        let manager = SessionManager::new(CredentialStore::in_memory());
        manager.begin("T1".into(), user("a")).unwrap();
        let (_, old_generation) = manager.authorization().unwrap();
        manager.begin("T2".into(), user("a")).unwrap();

        assert!(!manager.invalidate(old_generation));
        assert_eq!(manager.token().as_deref(), Some("T2"));
    }

    #[test]
    fn test_invalidate_when_anonymous_is_noop() {
        let manager = SessionManager::new(CredentialStore::in_memory());
        assert!(!manager.invalidate(manager.generation()));
        assert_eq!(manager.status(), SessionStatus::Anonymous);
    }

    #[test]
    fn test_concurrent_invalidate_transitions_once() {
        let manager = Arc::new(SessionManager::new(CredentialStore::in_memory()));
        manager.begin("T1".into(), user("a")).unwrap();
        let generation = manager.generation();
        let mut events = manager.subscribe();

        let ended = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let manager = Arc::clone(&manager);
                    scope.spawn(move || manager.invalidate(generation))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ended| *ended)
                .count()
        });

        assert_eq!(ended, 1);
        assert!(events.try_recv().unwrap().is_forced_logout());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_role_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"ADMIN\"");
        let role: Role = serde_json::from_str("\"USER\"").unwrap();
        assert_eq!(role, Role::User);
    }
}
