//! Live sessions and sessions waiting to be reclaimed

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::gateway::SessionHandle;
use crate::session::Session;

#[derive(Default)]
struct Inner {
    live: HashMap<SessionHandle, Arc<Session>>,
    retiring: Vec<Arc<Session>>,
}

/// Handle to session map
///
/// A destroyed session leaves the live map at once but stays allocated in the
/// retiring list for a grace period, because media and signaling work that
/// already holds an `Arc` may still be running against it.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. A session already registered under the same
    /// handle is retired, not dropped.
    pub fn insert(&self, session: Arc<Session>, now: Instant) {
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.live.insert(session.handle(), session) {
            tracing::warn!("Session {} registered twice, retiring the old one", previous.handle());
            previous.hang_up();
            previous.mark_destroyed(now);
            inner.retiring.push(previous);
        }
    }

    pub fn get(&self, handle: SessionHandle) -> Option<Arc<Session>> {
        self.inner.lock().live.get(&handle).cloned()
    }

    /// Move a session to the retiring list.
    ///
    /// Retiring a session twice is a no-op; an unknown handle is an error.
    pub fn retire(&self, handle: SessionHandle, now: Instant) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.live.remove(&handle) {
            Some(session) => {
                session.mark_destroyed(now);
                inner.retiring.push(session);
                Ok(())
            }
            None if inner.retiring.iter().any(|s| s.handle() == handle) => Ok(()),
            None => Err(Error::NoSession(handle)),
        }
    }

    /// Take every retiring session whose grace period has run out.
    ///
    /// The caller releases their resources outside the registry lock.
    pub fn sweep(&self, now: Instant, grace: Duration) -> Vec<Arc<Session>> {
        let mut inner = self.inner.lock();
        let (expired, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut inner.retiring)
                .into_iter()
                .partition(|session| {
                    session
                        .destroyed_at()
                        .is_some_and(|at| now.saturating_duration_since(at) >= grace)
                });
        inner.retiring = waiting;
        expired
    }

    /// Take every session, live or retiring
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let mut inner = self.inner.lock();
        let mut all: Vec<_> = inner.live.drain().map(|(_, session)| session).collect();
        all.append(&mut inner.retiring);
        all
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn retiring_count(&self) -> usize {
        self.inner.lock().retiring.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: u64) -> Arc<Session> {
        Arc::new(Session::new(SessionHandle(id)))
    }

    #[test]
    fn test_retire_then_sweep_after_grace() {
        let registry = SessionRegistry::new();
        let start = Instant::now();
        let grace = Duration::from_secs(5);

        registry.insert(session(1), start);
        registry.retire(SessionHandle(1), start).unwrap();
        assert!(registry.get(SessionHandle(1)).is_none());
        assert_eq!(registry.retiring_count(), 1);

        assert!(registry.sweep(start + Duration::from_millis(4900), grace).is_empty());
        assert_eq!(registry.retiring_count(), 1);

        let expired = registry.sweep(start + Duration::from_millis(5000), grace);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].handle(), SessionHandle(1));
        assert_eq!(registry.retiring_count(), 0);
    }

    #[test]
    fn test_retire_twice_and_unknown() {
        let registry = SessionRegistry::new();
        let now = Instant::now();
        registry.insert(session(7), now);

        registry.retire(SessionHandle(7), now).unwrap();
        registry.retire(SessionHandle(7), now + Duration::from_secs(1)).unwrap();
        assert_eq!(registry.retiring_count(), 1);

        assert!(matches!(
            registry.retire(SessionHandle(8), now),
            Err(Error::NoSession(SessionHandle(8)))
        ));
    }

    #[test]
    fn test_reinsert_retires_previous() {
        let registry = SessionRegistry::new();
        let now = Instant::now();
        let old = session(3);
        registry.insert(old.clone(), now);
        registry.insert(session(3), now);

        assert!(old.is_destroyed());
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.retiring_count(), 1);
        assert!(!Arc::ptr_eq(&registry.get(SessionHandle(3)).unwrap(), &old));
    }

    #[test]
    fn test_drain_takes_everything() {
        let registry = SessionRegistry::new();
        let now = Instant::now();
        registry.insert(session(1), now);
        registry.insert(session(2), now);
        registry.retire(SessionHandle(2), now).unwrap();

        assert_eq!(registry.drain().len(), 2);
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.retiring_count(), 0);
    }
}
