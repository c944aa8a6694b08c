use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tokio::sync::RwLock;
use tracing::debug;

use crate::connection::ConnectionWriter;
use crate::protocol::validate_name;

/// Who is currently in the chat: display name → write handle.
///
/// Every mutation and every snapshot goes through the same lock, so a
/// snapshot never observes a half-applied register or unregister.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, ConnectionWriter>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `name` if nobody holds it yet.
    ///
    /// This is the only uniqueness check that counts: callers must treat
    /// `false` as "name taken" even if they checked beforehand. Names that
    /// break the naming rules are refused as well.
    pub async fn register(&self, name: &str, conn: ConnectionWriter) -> bool {
        if validate_name(name) != Ok(name) {
            return false;
        }

        let mut entries = self.entries.write().await;
        match entries.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                debug!(name, peer = %conn.peer_addr(), "Registered");
                slot.insert(conn);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Remove `name`. Removing an absent name is a no-op.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.entries.write().await.remove(name).is_some();
        if removed {
            debug!(name, "Unregistered");
        }
        removed
    }

    /// Consistent copy of all entries, for fan-out.
    pub async fn snapshot(&self) -> Vec<(String, ConnectionWriter)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(name, conn)| (name.clone(), conn.clone()))
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    /// Registered names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
