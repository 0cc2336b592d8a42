use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::session::Session;

/// Callback receiving the full, sorted list of display names after every membership change.
///
/// Listeners run on the thread that mutated the registry and must not register
/// further listeners from inside the callback.
pub type RegistryListener = Arc<dyn Fn(&[String]) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("display name {0:?} is already taken")]
    AlreadyTaken(String),
}

/// Display name to session mapping shared by every connection handler.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    listeners: Mutex<Vec<RegistryListener>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session` under its display name unless that name is taken.
    pub fn register(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        {
            let mut sessions = self.sessions.write();
            let name = session.display_name();
            if sessions.contains_key(name) {
                return Err(RegistryError::AlreadyTaken(name.to_string()));
            }
            sessions.insert(name.to_string(), session);
        }
        self.notify();
        Ok(())
    }

    /// Remove whatever session holds `name`. Idempotent.
    pub fn unregister(&self, name: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(name);
        if removed.is_some() {
            self.notify();
        }
        removed
    }

    /// Remove `session` only if it is still the one registered under its name.
    pub fn remove_session(&self, session: &Session) -> bool {
        let removed = {
            let mut sessions = self.sessions.write();
            match sessions.get(session.display_name()) {
                Some(current) if current.id() == session.id() => {
                    sessions.remove(session.display_name());
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.notify();
        }
        removed
    }

    /// Call `f` for every live session except the one named `origin`.
    ///
    /// Iterates over a snapshot taken under the lock, so `f` may block or
    /// re-enter the registry. Sessions closed after the snapshot are skipped.
    pub fn for_each_except<F>(&self, origin: &str, mut f: F)
    where
        F: FnMut(&Arc<Session>),
    {
        let recipients: Vec<Arc<Session>> = self
            .sessions
            .read()
            .iter()
            .filter(|(name, _)| name.as_str() != origin)
            .map(|(_, session)| Arc::clone(session))
            .collect();

        for session in recipients {
            if session.is_closed() {
                continue;
            }
            f(&session);
        }
    }

    /// Sorted snapshot of the registered display names.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn on_changed(&self, listener: RegistryListener) {
        self.listeners.lock().push(listener);
    }

    // The listener lock serializes notifications, and the name list is read
    // while holding it, so a later notification never carries older membership.
    fn notify(&self) {
        let listeners = self.listeners.lock();
        if listeners.is_empty() {
            return;
        }
        let names = self.list_names();
        for listener in listeners.iter() {
            listener(&names);
        }
    }
}
