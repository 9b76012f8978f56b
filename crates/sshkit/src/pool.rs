//! Connection reuse keyed by host address.

use crate::error::Result;
use crate::session::{Connector, Session, Target};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Cache of open sessions, one per public address.
///
/// `connect` hands out the cached session while it is open and transparently
/// redials once it has been closed. The map lock is held across the dial, so
/// concurrent `connect` calls for one address serialize instead of racing to
/// open two sessions.
pub struct SessionPool {
    connector: Arc<dyn Connector>,
    sessions: Mutex<HashMap<String, Arc<dyn Session>>>,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Return the open session for `target.address`, dialing if needed.
    pub fn connect(&self, target: &Target) -> Result<Arc<dyn Session>> {
        let mut sessions = lock_sessions(&self.sessions);

        if let Some(existing) = sessions.get(&target.address) {
            if !existing.is_closed() {
                return Ok(Arc::clone(existing));
            }
            log::debug!("session to {} is closed, redialing", target.address);
        }

        let session = self.connector.connect(target)?;
        sessions.insert(target.address.clone(), Arc::clone(&session));
        Ok(session)
    }

    /// Number of cached sessions, open or not.
    pub fn len(&self) -> usize {
        lock_sessions(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close and forget every session.
    pub fn close_all(&self) {
        let mut sessions = lock_sessions(&self.sessions);
        for (address, session) in sessions.drain() {
            if let Err(e) = session.close() {
                log::warn!("failed to close session to {address}: {e}");
            }
        }
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn lock_sessions(
    sessions: &Mutex<HashMap<String, Arc<dyn Session>>>,
) -> MutexGuard<'_, HashMap<String, Arc<dyn Session>>> {
    match sessions.lock() {
        Ok(locked) => locked,
        Err(poisoned) => poisoned.into_inner(),
    }
}
