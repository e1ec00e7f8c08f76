//! Durable session store
//!
//! Sessions are persisted as JSONL (one snapshot per mutation) to the file
//! specified in config. On startup the log is replayed with last-write-wins
//! per session id, which rebuilds the open-session index. The in-memory
//! variant backs tests and dry runs.

use crate::domain::session::ParkingSession;
use crate::domain::types::PlateId;
use rustc_hash::FxHashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Store failure - the only condition fatal to a toggle call
#[derive(Debug)]
pub enum StoreError {
    /// The persistence layer is unreachable (I/O failure)
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(reason) => write!(f, "store unavailable: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Contract the ledger needs from a durable append/update store
///
/// The single-open-session invariant is enforced by the ledger's
/// lookup-before-insert sequence; all ledger calls are serialized by the
/// pipeline task, so implementations need no internal locking.
pub trait SessionStore: Send {
    /// Persist a newly opened session
    fn insert(&mut self, session: &ParkingSession) -> Result<(), StoreError>;

    /// Persist a mutation (close, mark-paid) of an existing session
    fn update(&mut self, session: &ParkingSession) -> Result<(), StoreError>;

    /// The open session for a plate, if any
    fn find_open(&self, plate: &PlateId) -> Result<Option<ParkingSession>, StoreError>;

    /// Look up a session by id
    fn get(&self, id: &str) -> Result<Option<ParkingSession>, StoreError>;

    /// Open sessions, most recent entry first
    fn list_open(&self) -> Result<Vec<ParkingSession>, StoreError>;

    /// All sessions, most recent first, bounded by `limit`
    fn history(&self, limit: usize) -> Result<Vec<ParkingSession>, StoreError>;
}

/// Shared in-memory index over session snapshots
#[derive(Default)]
struct SessionIndex {
    /// Latest snapshot per session id
    sessions: FxHashMap<String, ParkingSession>,
    /// Session ids in insertion order
    order: Vec<String>,
    /// Plate -> open session id
    open_by_plate: FxHashMap<PlateId, String>,
}

impl SessionIndex {
    fn apply(&mut self, session: ParkingSession) {
        if !self.sessions.contains_key(&session.id) {
            self.order.push(session.id.clone());
        }
        if session.is_open() {
            self.open_by_plate.insert(session.plate.clone(), session.id.clone());
        } else if self.open_by_plate.get(&session.plate) == Some(&session.id) {
            self.open_by_plate.remove(&session.plate);
        }
        self.sessions.insert(session.id.clone(), session);
    }

    fn find_open(&self, plate: &PlateId) -> Option<ParkingSession> {
        self.open_by_plate.get(plate).and_then(|id| self.sessions.get(id)).cloned()
    }

    fn get(&self, id: &str) -> Option<ParkingSession> {
        self.sessions.get(id).cloned()
    }

    fn list_open(&self) -> Vec<ParkingSession> {
        let mut open: Vec<ParkingSession> = self
            .open_by_plate
            .values()
            .filter_map(|id| self.sessions.get(id))
            .cloned()
            .collect();
        open.sort_by(|a, b| b.entry_time.cmp(&a.entry_time));
        open
    }

    fn history(&self, limit: usize) -> Vec<ParkingSession> {
        self.order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| self.sessions.get(id))
            .cloned()
            .collect()
    }
}

/// In-memory session store (no durability)
#[derive(Default)]
pub struct MemoryStore {
    index: SessionIndex,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn insert(&mut self, session: &ParkingSession) -> Result<(), StoreError> {
        self.index.apply(session.clone());
        Ok(())
    }

    fn update(&mut self, session: &ParkingSession) -> Result<(), StoreError> {
        self.index.apply(session.clone());
        Ok(())
    }

    fn find_open(&self, plate: &PlateId) -> Result<Option<ParkingSession>, StoreError> {
        Ok(self.index.find_open(plate))
    }

    fn get(&self, id: &str) -> Result<Option<ParkingSession>, StoreError> {
        Ok(self.index.get(id))
    }

    fn list_open(&self) -> Result<Vec<ParkingSession>, StoreError> {
        Ok(self.index.list_open())
    }

    fn history(&self, limit: usize) -> Result<Vec<ParkingSession>, StoreError> {
        Ok(self.index.history(limit))
    }
}

/// JSONL-backed session store
///
/// Every mutation appends one full session snapshot; the write happens
/// before the in-memory index is touched, so a failed append leaves no
/// partial state behind.
pub struct JsonlStore {
    file_path: PathBuf,
    index: SessionIndex,
}

impl JsonlStore {
    /// Open (or create) a store at the given path, replaying any existing log
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let file_path = path.as_ref().to_path_buf();
        let mut index = SessionIndex::default();

        if file_path.exists() {
            let file = std::fs::File::open(&file_path)?;
            let reader = BufReader::new(file);
            let mut replayed = 0usize;
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ParkingSession>(&line) {
                    Ok(session) => {
                        index.apply(session);
                        replayed += 1;
                    }
                    Err(e) => {
                        warn!(line = %(line_no + 1), error = %e, "store_replay_skipped_line");
                    }
                }
            }
            info!(
                file = %file_path.display(),
                snapshots = %replayed,
                sessions = %index.sessions.len(),
                open = %index.open_by_plate.len(),
                "store_replayed"
            );
        } else {
            info!(file = %file_path.display(), "store_initialized");
        }

        Ok(Self { file_path, index })
    }

    /// Append one session snapshot to the log
    fn append(&self, session: &ParkingSession) -> Result<(), StoreError> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string(session)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        writeln!(file, "{}", json)?;
        debug!(id = %session.id, bytes = %json.len(), "store_appended");
        Ok(())
    }

    fn persist(&mut self, session: &ParkingSession) -> Result<(), StoreError> {
        self.append(session)?;
        self.index.apply(session.clone());
        Ok(())
    }
}

impl SessionStore for JsonlStore {
    fn insert(&mut self, session: &ParkingSession) -> Result<(), StoreError> {
        self.persist(session)
    }

    fn update(&mut self, session: &ParkingSession) -> Result<(), StoreError> {
        self.persist(session)
    }

    fn find_open(&self, plate: &PlateId) -> Result<Option<ParkingSession>, StoreError> {
        Ok(self.index.find_open(plate))
    }

    fn get(&self, id: &str) -> Result<Option<ParkingSession>, StoreError> {
        Ok(self.index.get(id))
    }

    fn list_open(&self) -> Result<Vec<ParkingSession>, StoreError> {
        Ok(self.index.list_open())
    }

    fn history(&self, limit: usize) -> Result<Vec<ParkingSession>, StoreError> {
        Ok(self.index.history(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use tempfile::tempdir;

    fn session(plate: &str) -> ParkingSession {
        ParkingSession::open(PlateId::from(plate), Utc::now())
    }

    #[test]
    fn test_memory_insert_and_find_open() {
        let mut store = MemoryStore::new();
        let s = session("B1234XYZ");

        store.insert(&s).unwrap();

        let found = store.find_open(&PlateId::from("B1234XYZ")).unwrap().unwrap();
        assert_eq!(found.id, s.id);
        assert!(store.find_open(&PlateId::from("OTHER")).unwrap().is_none());
    }

    #[test]
    fn test_close_clears_open_index() {
        let mut store = MemoryStore::new();
        let mut s = session("B1234XYZ");
        store.insert(&s).unwrap();

        s.close(Utc::now(), 2000.0);
        store.update(&s).unwrap();

        assert!(store.find_open(&PlateId::from("B1234XYZ")).unwrap().is_none());
        // Record still retrievable by id
        assert!(store.get(&s.id).unwrap().is_some());
    }

    #[test]
    fn test_list_open_most_recent_entry_first() {
        let mut store = MemoryStore::new();
        let base = Utc::now();

        let mut first = session("AA11");
        first.entry_time = base;
        let mut second = session("BB22");
        second.entry_time = base + TimeDelta::minutes(5);

        store.insert(&first).unwrap();
        store.insert(&second).unwrap();

        let open = store.list_open().unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].plate, PlateId::from("BB22"));
        assert_eq!(open[1].plate, PlateId::from("AA11"));
    }

    #[test]
    fn test_history_bounded_and_most_recent_first() {
        let mut store = MemoryStore::new();
        for i in 0..5 {
            store.insert(&session(&format!("P{}", i))).unwrap();
        }

        let history = store.history(3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].plate, PlateId::from("P4"));
        assert_eq!(history[2].plate, PlateId::from("P2"));
    }

    #[test]
    fn test_jsonl_roundtrip_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.jsonl");

        let open_session = session("AA11");
        let mut closed_session = session("BB22");
        {
            let mut store = JsonlStore::open(&path).unwrap();
            store.insert(&open_session).unwrap();
            store.insert(&closed_session).unwrap();
            closed_session.close(Utc::now(), 2000.0);
            closed_session.paid = true;
            store.update(&closed_session).unwrap();
        }

        // Reopen and replay
        let store = JsonlStore::open(&path).unwrap();
        let still_open = store.find_open(&PlateId::from("AA11")).unwrap().unwrap();
        assert_eq!(still_open.id, open_session.id);
        assert!(store.find_open(&PlateId::from("BB22")).unwrap().is_none());

        let replayed = store.get(&closed_session.id).unwrap().unwrap();
        assert!(replayed.paid);
        assert!(!replayed.is_open());
    }

    #[test]
    fn test_replay_skips_corrupt_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.jsonl");

        let s = session("AA11");
        {
            let mut store = JsonlStore::open(&path).unwrap();
            store.insert(&s).unwrap();
        }
        // Corrupt trailing line (e.g. torn write)
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();

        let store = JsonlStore::open(&path).unwrap();
        assert!(store.find_open(&PlateId::from("AA11")).unwrap().is_some());
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("data").join("sessions.jsonl");

        let mut store = JsonlStore::open(&path).unwrap();
        store.insert(&session("AA11")).unwrap();

        assert!(path.exists());
    }
}
