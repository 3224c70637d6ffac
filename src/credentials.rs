//! Credential store backing the demo login / registration pages.
//!
//! The worker pool reaches the store only through pooled [`StoreHandle`]s; the
//! map behind them is shared and mutex-protected.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

pub trait CredentialStore {
    fn lookup(&self, username: &str) -> Option<String>;
    /// Insert a new user. Returns `false` if the name is already taken.
    fn insert(&self, username: &str, password: &str) -> bool;
}

type Users = Arc<Mutex<HashMap<String, String>>>;

fn lookup(users: &Users, username: &str) -> Option<String> {
    users.lock().get(username).cloned()
}

fn insert(users: &Users, username: &str, password: &str) -> bool {
    let mut users = users.lock();
    if users.contains_key(username) {
        return false;
    }
    users.insert(username.to_string(), password.to_string());
    true
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Users,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I, U, P>(users: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let map = users
            .into_iter()
            .map(|(u, p)| (u.into(), p.into()))
            .collect();
        Self {
            users: Arc::new(Mutex::new(map)),
        }
    }

    /// Open one pooled handle onto the store.
    pub fn connect(&self, id: usize) -> StoreHandle {
        StoreHandle {
            id,
            users: Arc::clone(&self.users),
        }
    }

    pub fn len(&self) -> usize {
        self.users.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for MemoryStore {
    fn lookup(&self, username: &str) -> Option<String> {
        lookup(&self.users, username)
    }

    fn insert(&self, username: &str, password: &str) -> bool {
        insert(&self.users, username, password)
    }
}

/// A pooled connection to a [`MemoryStore`].
pub struct StoreHandle {
    id: usize,
    users: Users,
}

impl StoreHandle {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl CredentialStore for StoreHandle {
    fn lookup(&self, username: &str) -> Option<String> {
        lookup(&self.users, username)
    }

    fn insert(&self, username: &str, password: &str) -> bool {
        insert(&self.users, username, password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_share_one_map() {
        let store = MemoryStore::with_users([("alice", "pw")]);
        let a = store.connect(0);
        let b = store.connect(1);
        assert!(a.insert("bob", "secret"));
        assert_eq!(b.lookup("bob").as_deref(), Some("secret"));
        assert_eq!(b.lookup("alice").as_deref(), Some("pw"));
        assert_eq!(store.len(), 2);

        // Store and handles go through the same map in both directions.
        assert!(store.insert("dave", "x"));
        assert!(!a.insert("dave", "y"));
        assert_eq!(b.lookup("dave").as_deref(), Some("x"));
        assert_eq!(store.lookup("bob").as_deref(), Some("secret"));
    }

    #[test]
    fn insert_refuses_duplicates() {
        let store = MemoryStore::new();
        assert!(store.insert("carol", "1"));
        assert!(!store.insert("carol", "2"));
        assert_eq!(store.lookup("carol").as_deref(), Some("1"));
    }
}
