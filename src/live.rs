//! Live fleet state broadcast.
//!
//! A last-write-wins key-value store of [`LiveTripState`], one entry per bus.
//! There is exactly one writer per key (the driver device running that bus's
//! trip) and any number of polling readers, so no locking protocol beyond a
//! whole-map snapshot is needed. [`MemoryStore`] is the in-process backend;
//! [`FileStore`] keeps the map as a JSON document so separate processes (the
//! `watch` observer) can poll it.

use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

use crate::trip::{LiveTripState, TripStatus};

/// Last-write-wins broadcast store, keyed by bus ID.
pub trait LiveStateStore: Send + Sync {
    /// Upserts the state for its bus, overwriting whatever was stored.
    fn publish(&self, state: LiveTripState) -> Result<()>;

    /// Flips the stored entry to `Ended` without removing it, so a still-open
    /// observer sees the terminal state at least once.
    fn mark_ended(&self, bus_id: &str) -> Result<()>;

    /// Snapshot of all stored entries. Observers filter for `Active`
    /// themselves.
    fn read_all(&self) -> Result<HashMap<String, LiveTripState>>;
}

/// In-process backend.
pub struct MemoryStore {
    trips: RwLock<HashMap<String, LiveTripState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            trips: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveStateStore for MemoryStore {
    fn publish(&self, state: LiveTripState) -> Result<()> {
        let mut trips = self
            .trips
            .write()
            .map_err(|_| anyhow::anyhow!("live state lock poisoned"))?;
        trips.insert(state.bus_id.clone(), state);
        Ok(())
    }

    fn mark_ended(&self, bus_id: &str) -> Result<()> {
        let mut trips = self
            .trips
            .write()
            .map_err(|_| anyhow::anyhow!("live state lock poisoned"))?;
        if let Some(state) = trips.get_mut(bus_id) {
            state.status = TripStatus::Ended;
        }
        Ok(())
    }

    fn read_all(&self) -> Result<HashMap<String, LiveTripState>> {
        let trips = self
            .trips
            .read()
            .map_err(|_| anyhow::anyhow!("live state lock poisoned"))?;
        Ok(trips.clone())
    }
}

/// JSON-file backend: the whole map is rewritten on every publish.
///
/// A missing or unreadable file reads as the empty map rather than an error,
/// so observers keep polling through writer restarts.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> HashMap<String, LiveTripState> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    fn save(&self, trips: &HashMap<String, LiveTripState>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(trips)?)?;
        Ok(())
    }

    /// Drops all stored entries, e.g. at the start of a service day.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl LiveStateStore for FileStore {
    fn publish(&self, state: LiveTripState) -> Result<()> {
        let mut trips = self.load();
        debug!(bus_id = %state.bus_id, students = state.student_count, "Publishing live state");
        trips.insert(state.bus_id.clone(), state);
        self.save(&trips)
    }

    fn mark_ended(&self, bus_id: &str) -> Result<()> {
        let mut trips = self.load();
        if let Some(state) = trips.get_mut(bus_id) {
            state.status = TripStatus::Ended;
            self.save(&trips)?;
        }
        Ok(())
    }

    fn read_all(&self) -> Result<HashMap<String, LiveTripState>> {
        Ok(self.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trip::RouteType;
    use chrono::Utc;
    use std::env;
    use std::fs;

    fn state(bus_id: &str, student_count: usize) -> LiveTripState {
        LiveTripState {
            bus_id: bus_id.to_string(),
            driver_name: "John Smith".to_string(),
            route_type: RouteType::AmPickup,
            start_time: Utc::now(),
            last_updated: Utc::now(),
            current_location: None,
            logs: vec![],
            student_count,
            total_students: 10,
            status: TripStatus::Active,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    #[test]
    fn test_memory_store_last_write_wins() {
        let store = MemoryStore::new();
        store.publish(state("BUS-A", 1)).unwrap();
        store.publish(state("BUS-A", 4)).unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["BUS-A"].student_count, 4);
    }

    #[test]
    fn test_memory_store_keys_are_independent() {
        let store = MemoryStore::new();
        store.publish(state("BUS-A", 1)).unwrap();
        store.publish(state("BUS-B", 2)).unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["BUS-B"].student_count, 2);
    }

    #[test]
    fn test_mark_ended_keeps_entry_visible() {
        let store = MemoryStore::new();
        store.publish(state("BUS-A", 3)).unwrap();
        store.mark_ended("BUS-A").unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all["BUS-A"].status, TripStatus::Ended);
    }

    #[test]
    fn test_mark_ended_on_unknown_bus_is_noop() {
        let store = MemoryStore::new();
        store.mark_ended("BUS-X").unwrap();
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_round_trip() {
        let path = temp_path("fleet_attendance_test_roundtrip.json");
        let _ = fs::remove_file(&path);

        let store = FileStore::new(&path);
        store.publish(state("BUS-A", 2)).unwrap();
        store.publish(state("BUS-A", 5)).unwrap();
        store.mark_ended("BUS-A").unwrap();

        // fresh handle reads the same file
        let reader = FileStore::new(&path);
        let all = reader.read_all().unwrap();
        assert_eq!(all["BUS-A"].student_count, 5);
        assert_eq!(all["BUS-A"].status, TripStatus::Ended);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_file_store_missing_file_reads_empty() {
        let store = FileStore::new(temp_path("fleet_attendance_test_missing.json"));
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_corrupt_file_reads_empty() {
        let path = temp_path("fleet_attendance_test_corrupt.json");
        fs::write(&path, "not json {{{").unwrap();

        let store = FileStore::new(&path);
        assert!(store.read_all().unwrap().is_empty());

        fs::remove_file(&path).unwrap();
    }
}
