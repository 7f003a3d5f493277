//! Server-side session bookkeeping.
//!
//! Sessions live in a concurrent map keyed by id. The command loop
//! inserts and removes entries; the streaming task owns the file handle
//! outright and never reaches it through the table.

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// One in-progress file send
#[derive(Debug)]
pub struct Session {
    /// Session id, unique within the server process
    pub id: u32,
    /// Absolute path of the file being sent
    pub path: PathBuf,
    /// Total file size in bytes
    pub size: u64,
    /// Precomputed BLAKE3 digest of the file
    pub hash: [u8; 32],
    /// Highest offset the receiver has acknowledged
    acked: AtomicU64,
}

impl Session {
    /// Create a session record
    #[must_use]
    pub fn new(id: u32, path: PathBuf, size: u64, hash: [u8; 32]) -> Self {
        Self {
            id,
            path,
            size,
            hash,
            acked: AtomicU64::new(0),
        }
    }

    /// Record a receiver acknowledgment.
    ///
    /// Informational for now; a future sender window would gate on it.
    pub fn record_ack(&self, offset: u64) {
        self.acked.fetch_max(offset, Ordering::Relaxed);
    }

    /// Highest acknowledged offset seen so far
    #[must_use]
    pub fn last_ack(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }
}

/// Concurrent session table with monotonic id assignment.
///
/// The id counter is atomic so every connection task can allocate from
/// the same server-wide sequence.
pub struct SessionTable {
    sessions: DashMap<u32, Arc<Session>>,
    next_id: AtomicU32,
}

impl SessionTable {
    /// Create an empty table; ids start at 1
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Allocate the next session id
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert a session
    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.id, session);
    }

    /// Remove a session, returning it when present
    pub fn remove(&self, id: u32) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, s)| s)
    }

    /// Look up a session by id
    #[must_use]
    pub fn get(&self, id: u32) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Number of active sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no session is active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let table = SessionTable::new();
        let a = table.next_id();
        let b = table.next_id();
        let c = table.next_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_insert_get_remove() {
        let table = SessionTable::new();
        let id = table.next_id();
        table.insert(Arc::new(Session::new(id, PathBuf::from("/x"), 10, [0u8; 32])));

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(id).unwrap().size, 10);

        let removed = table.remove(id).unwrap();
        assert_eq!(removed.id, id);
        assert!(table.is_empty());
        assert!(table.remove(id).is_none());
    }

    #[test]
    fn test_ack_tracking_keeps_maximum() {
        let session = Session::new(1, PathBuf::from("/x"), 100, [0u8; 32]);
        session.record_ack(65_536);
        session.record_ack(32_768);
        assert_eq!(session.last_ack(), 65_536);
    }

    #[test]
    fn test_concurrent_id_allocation_is_unique() {
        let table = Arc::new(SessionTable::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = Arc::clone(&table);
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| table.next_id()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 800);
    }
}
