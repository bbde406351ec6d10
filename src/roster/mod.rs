//! Roster provider integration.
//!
//! [`RosterApi`] is the trait boundary to the Student Information System.
//! [`SisClient`] implements it over HTTP; [`RosterCache`] layers local
//! fuzzy search and last-sync tracking on top of any implementation.

mod client;

pub use client::SisClient;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A student record as served by the SIS. The trip core only ever holds
/// these by value as denormalized display data; the SIS owns the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub grade: u8,
    #[serde(default)]
    pub photo_url: String,
    /// Assigned bus, or `None` for unassigned students.
    pub bus_id: Option<String>,
    #[serde(default)]
    pub parent_phone: String,
}

/// A bus and its fixed route endpoint (the school is the other end).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bus {
    pub id: String,
    pub name: String,
    pub driver_name: String,
    pub endpoint_address: String,
    pub endpoint_lat: f64,
    pub endpoint_lng: f64,
}

/// Abstraction over the roster provider.
#[async_trait::async_trait]
pub trait RosterApi: Send + Sync {
    /// Returns all students assigned to `bus_id`.
    async fn fetch_manifest(&self, bus_id: &str) -> Result<Vec<Student>>;

    /// Searches students by ID or name fragment.
    async fn search_students(&self, query: &str) -> Result<Vec<Student>>;
}

/// Caching layer over a [`RosterApi`].
///
/// Search hits the local cache first (case-insensitive ID or name substring)
/// and only falls through to the backend when the cache has no match. A
/// failed sync degrades to the empty manifest so trips can still run
/// ad-hoc-only.
pub struct RosterCache<A> {
    api: A,
    students: Vec<Student>,
    last_sync: Option<DateTime<Utc>>,
}

impl<A: RosterApi> RosterCache<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            students: Vec::new(),
            last_sync: None,
        }
    }

    /// Syncs the manifest for `bus_id` into the cache. Failure is degraded
    /// to an empty manifest, never propagated.
    pub async fn sync_manifest(&mut self, bus_id: &str) -> Vec<Student> {
        match self.api.fetch_manifest(bus_id).await {
            Ok(students) => {
                info!(bus_id, count = students.len(), "Roster sync complete");
                self.students = students.clone();
                self.last_sync = Some(Utc::now());
                students
            }
            Err(e) => {
                warn!(bus_id, error = %e, "Roster unavailable, starting with empty manifest");
                Vec::new()
            }
        }
    }

    /// Resolves a student by exact ID from the cache.
    pub fn get_by_id(&self, id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id.eq_ignore_ascii_case(id))
    }

    /// Fuzzy search: local cache first, backend fallback. Backend failure
    /// degrades to an empty result.
    pub async fn search(&self, query: &str) -> Vec<Student> {
        let local = search_cached(&self.students, query);
        if !local.is_empty() {
            return local;
        }

        match self.api.search_students(query).await {
            Ok(results) => results,
            Err(e) => {
                warn!(query, error = %e, "Backend search failed");
                Vec::new()
            }
        }
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn cached_students(&self) -> &[Student] {
        &self.students
    }
}

/// Case-insensitive match on ID or name substring.
fn search_cached(students: &[Student], query: &str) -> Vec<Student> {
    let q = query.to_lowercase();
    students
        .iter()
        .filter(|s| s.name.to_lowercase().contains(&q) || s.id.to_lowercase().contains(&q))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: &str, name: &str) -> Student {
        Student {
            id: id.to_string(),
            name: name.to_string(),
            grade: 10,
            photo_url: String::new(),
            bus_id: Some("BUS-A".to_string()),
            parent_phone: String::new(),
        }
    }

    struct StubApi {
        manifest: Result<Vec<Student>, String>,
        backend_results: Vec<Student>,
    }

    #[async_trait::async_trait]
    impl RosterApi for StubApi {
        async fn fetch_manifest(&self, _bus_id: &str) -> Result<Vec<Student>> {
            match &self.manifest {
                Ok(s) => Ok(s.clone()),
                Err(msg) => Err(anyhow::anyhow!(msg.clone())),
            }
        }

        async fn search_students(&self, _query: &str) -> Result<Vec<Student>> {
            Ok(self.backend_results.clone())
        }
    }

    #[tokio::test]
    async fn test_sync_populates_cache() {
        let api = StubApi {
            manifest: Ok(vec![student("S1", "Ana Ruiz")]),
            backend_results: vec![],
        };
        let mut cache = RosterCache::new(api);

        let manifest = cache.sync_manifest("BUS-A").await;
        assert_eq!(manifest.len(), 1);
        assert!(cache.last_sync().is_some());
        assert!(cache.get_by_id("s1").is_some());
    }

    #[tokio::test]
    async fn test_sync_failure_degrades_to_empty_manifest() {
        let api = StubApi {
            manifest: Err("connection refused".to_string()),
            backend_results: vec![],
        };
        let mut cache = RosterCache::new(api);

        let manifest = cache.sync_manifest("BUS-A").await;
        assert!(manifest.is_empty());
        assert!(cache.last_sync().is_none());
    }

    #[tokio::test]
    async fn test_search_prefers_local_cache() {
        let api = StubApi {
            manifest: Ok(vec![student("S1", "Ana Ruiz"), student("S2", "Ben Cole")]),
            backend_results: vec![student("S9", "Backend Only")],
        };
        let mut cache = RosterCache::new(api);
        cache.sync_manifest("BUS-A").await;

        let hits = cache.search("ana").await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "S1");
    }

    #[tokio::test]
    async fn test_search_falls_back_to_backend() {
        let api = StubApi {
            manifest: Ok(vec![student("S1", "Ana Ruiz")]),
            backend_results: vec![student("S9", "Zoe Park")],
        };
        let mut cache = RosterCache::new(api);
        cache.sync_manifest("BUS-A").await;

        let hits = cache.search("zoe").await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "S9");
    }

    #[test]
    fn test_search_cached_matches_id_fragment() {
        let students = vec![student("STU-1042", "Ana Ruiz")];
        assert_eq!(search_cached(&students, "1042").len(), 1);
        assert_eq!(search_cached(&students, "xyz").len(), 0);
    }
}
