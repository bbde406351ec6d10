//! Driver-side trip orchestration.
//!
//! [`TripRunner`] couples one [`TripSession`] with the live state store and
//! the report compiler: every successful mutation republishes the projection,
//! and ending the trip hands the finalized session off for report text.
//! Publish failures are logged and never fail the driver action; the log on
//! the device is the source of truth, the broadcast is best-effort.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::TripError;
use crate::live::LiveStateStore;
use crate::report::{ReportCompiler, TripReport};
use crate::roster::{Bus, Student};
use crate::trip::{
    GeoPoint, IncidentKind, RouteType, Severity, StudentStatus, TripSession, TripStatus,
};

/// Text surfaced in place of a report when the compile call fails.
pub const REPORT_PLACEHOLDER: &str =
    "Report generation failed. The trip log was saved without a summary.";

pub struct TripRunner {
    session: TripSession,
    store: Arc<dyn LiveStateStore>,
    last_location: Option<GeoPoint>,
}

impl TripRunner {
    pub fn new(bus: Bus, route_type: RouteType, store: Arc<dyn LiveStateStore>) -> Self {
        Self {
            session: TripSession::new(bus, route_type),
            store,
            last_location: None,
        }
    }

    pub fn session(&self) -> &TripSession {
        &self.session
    }

    /// Starts the trip and publishes the first live state.
    pub fn start_trip(
        &mut self,
        manifest: Vec<Student>,
        location: Option<GeoPoint>,
    ) -> Result<(), TripError> {
        self.session.start(manifest, location)?;
        self.last_location = location;
        info!(
            bus_id = %self.session.bus.id,
            students = self.session.total_students(),
            "Trip started"
        );
        self.publish();
        Ok(())
    }

    /// Records a scan or manual check-in and republishes.
    pub fn scan(
        &mut self,
        student: &Student,
        location: Option<GeoPoint>,
    ) -> Result<StudentStatus, TripError> {
        let status = self.session.record_attendance(student, location)?;
        if let Some(loc) = location {
            self.last_location = Some(loc);
        }
        info!(
            student_id = %student.id,
            status = ?status,
            on_bus = self.session.on_bus_count(),
            "Attendance recorded"
        );
        self.publish();
        Ok(status)
    }

    /// Files an incident and republishes. Returns the incident ID.
    pub fn report_incident(
        &mut self,
        kind: IncidentKind,
        severity: Severity,
        description: String,
    ) -> Result<String, TripError> {
        let id = self.session.report_incident(kind, severity, description)?;
        warn!(incident_id = %id, kind = ?kind, severity = ?severity, "Incident reported");
        self.publish();
        Ok(id)
    }

    /// Periodic location tick. Ignored when no trip is active; each tick
    /// supersedes the previous one, last value wins.
    pub fn sample_location(&mut self, location: Option<GeoPoint>) {
        if let Some(loc) = location {
            self.last_location = Some(loc);
            if self.session.status == TripStatus::Active {
                self.publish();
            }
        }
    }

    /// Ends the trip, publishes the terminal state, and compiles the report.
    ///
    /// Compilation is best-effort: any failure yields [`REPORT_PLACEHOLDER`]
    /// and the trip is still ended.
    pub async fn end_trip(
        &mut self,
        location: Option<GeoPoint>,
        compiler: &dyn ReportCompiler,
    ) -> Result<(TripReport, String), TripError> {
        self.session.end(location)?;
        if let Some(loc) = location {
            self.last_location = Some(loc);
        }
        self.publish();
        if let Err(e) = self.store.mark_ended(&self.session.bus.id) {
            error!(error = %e, "Failed to mark live state ended");
        }

        let report = TripReport::from_session(&self.session)?;
        let text = match compiler.compile(&report).await {
            Ok(text) => text,
            Err(e) => {
                let err = TripError::ReportCompilationFailed(e.to_string());
                error!(error = %err, "Falling back to placeholder report");
                REPORT_PLACEHOLDER.to_string()
            }
        };

        info!(
            bus_id = %self.session.bus.id,
            absent = report.absent_count(),
            incidents = report.incidents.len(),
            "Trip ended"
        );
        Ok((report, text))
    }

    fn publish(&self) {
        let state = self.session.live_state(self.last_location);
        if let Err(e) = self.store.publish(state) {
            error!(bus_id = %self.session.bus.id, error = %e, "Live state publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::MemoryStore;
    use crate::trip::TripStatus;
    use anyhow::Result;

    fn bus() -> Bus {
        Bus {
            id: "BUS-A".to_string(),
            name: "Bus A - High School".to_string(),
            driver_name: "John Smith".to_string(),
            endpoint_address: "1700 W 46th St, Los Angeles, CA 90062".to_string(),
            endpoint_lat: 34.0035,
            endpoint_lng: -118.306,
        }
    }

    fn student(id: &str, name: &str) -> Student {
        Student {
            id: id.to_string(),
            name: name.to_string(),
            grade: 9,
            photo_url: String::new(),
            bus_id: Some("BUS-A".to_string()),
            parent_phone: String::new(),
        }
    }

    struct StubCompiler {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ReportCompiler for StubCompiler {
        async fn compile(&self, report: &TripReport) -> Result<String> {
            if self.fail {
                Err(anyhow::anyhow!("503 from report service"))
            } else {
                Ok(format!("Trip Report: {}", report.bus_name))
            }
        }
    }

    fn runner(store: Arc<MemoryStore>) -> TripRunner {
        TripRunner::new(bus(), RouteType::AmPickup, store)
    }

    #[test]
    fn test_every_mutation_publishes_consistent_counts() {
        let store = Arc::new(MemoryStore::new());
        let mut runner = runner(store.clone());
        runner
            .start_trip(vec![student("S1", "Ana Ruiz")], None)
            .unwrap();

        runner.scan(&student("S1", "Ana Ruiz"), None).unwrap();
        let published = &store.read_all().unwrap()["BUS-A"];
        assert_eq!(published.student_count, 1);
        assert_eq!(published.total_students, 1);

        runner.scan(&student("S1", "Ana Ruiz"), None).unwrap();
        let published = &store.read_all().unwrap()["BUS-A"];
        assert_eq!(published.student_count, 0);
    }

    #[test]
    fn test_ad_hoc_scan_grows_published_total() {
        let store = Arc::new(MemoryStore::new());
        let mut runner = runner(store.clone());
        runner
            .start_trip(vec![student("S1", "Ana Ruiz")], None)
            .unwrap();

        runner.scan(&student("S99", "Zoe Park"), None).unwrap();
        let published = &store.read_all().unwrap()["BUS-A"];
        assert_eq!(published.total_students, 2);
        assert_eq!(published.student_count, 1);
    }

    #[test]
    fn test_location_tick_ignored_before_start() {
        let store = Arc::new(MemoryStore::new());
        let mut runner = runner(store.clone());
        runner.sample_location(Some(GeoPoint::new(34.0, -118.3)));
        assert!(store.read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_end_trip_marks_store_ended() {
        let store = Arc::new(MemoryStore::new());
        let mut runner = runner(store.clone());
        runner.start_trip(vec![], None).unwrap();

        let (_, text) = runner
            .end_trip(None, &StubCompiler { fail: false })
            .await
            .unwrap();
        assert!(text.contains("Bus A"));
        assert_eq!(store.read_all().unwrap()["BUS-A"].status, TripStatus::Ended);
    }

    #[tokio::test]
    async fn test_compiler_failure_yields_placeholder_and_trip_still_ends() {
        let store = Arc::new(MemoryStore::new());
        let mut runner = runner(store.clone());
        runner
            .start_trip(vec![student("S2", "Ben Cole")], None)
            .unwrap();

        let (report, text) = runner
            .end_trip(None, &StubCompiler { fail: true })
            .await
            .unwrap();
        assert_eq!(text, REPORT_PLACEHOLDER);
        assert_eq!(report.absent_count(), 1);
        assert_eq!(runner.session().status, TripStatus::Ended);
    }

    #[tokio::test]
    async fn test_end_twice_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut runner = runner(store);
        runner.start_trip(vec![], None).unwrap();
        runner
            .end_trip(None, &StubCompiler { fail: false })
            .await
            .unwrap();

        assert!(matches!(
            runner.end_trip(None, &StubCompiler { fail: false }).await,
            Err(TripError::InvalidStateTransition { .. })
        ));
    }
}
