//! Trip report compilation.
//!
//! [`TripReport`] is the snapshot payload built from a finalized session:
//! route description, timings, GPS fixes, the full manifest with derived
//! absentees, and any incidents. [`ReportCompiler`] hands it to a
//! generative-text service; report failure never blocks trip completion.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::TripError;
use crate::fetch::{HttpClient, post_json};
use crate::trip::{
    GeoPoint, Incident, RouteType, StudentStatus, TripSession, TripStatus,
};

/// The fixed end of every route; buses run endpoint -> school in the
/// morning and school -> endpoint in the afternoon.
pub const SCHOOL_ADDRESS: &str = "2340 Firestone Blvd, South Gate, CA 90280";

/// One manifest line in the report. `status` is the student's latest logged
/// status, or `Absent` when the trip ended with no log entry for them.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReportLine {
    pub name: String,
    pub grade: u8,
    pub ad_hoc: bool,
    pub status: StudentStatus,
    pub check_in_time: Option<DateTime<Utc>>,
}

/// Snapshot of a finished trip, POSTed to the report service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripReport {
    pub bus_name: String,
    pub driver: String,
    pub route_type: RouteType,
    pub route_description: String,
    pub date: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub start_location_gps: String,
    pub end_location_gps: String,
    pub total_students: usize,
    pub students: Vec<StudentReportLine>,
    pub incidents: Vec<Incident>,
}

impl TripReport {
    /// Builds the report payload from an ended session.
    ///
    /// # Errors
    ///
    /// Returns [`TripError::InvalidStateTransition`] if the session has not
    /// ended yet.
    pub fn from_session(session: &TripSession) -> Result<Self, TripError> {
        if session.status != TripStatus::Ended {
            return Err(TripError::invalid_transition(session.status, "compile report"));
        }

        let (origin, destination) = match session.route_type {
            RouteType::AmPickup => (session.bus.endpoint_address.as_str(), SCHOOL_ADDRESS),
            RouteType::PmDropoff => (SCHOOL_ADDRESS, session.bus.endpoint_address.as_str()),
        };

        let students = session
            .manifest()
            .iter()
            .map(|entry| {
                let log = session.attendance_for(&entry.student.id);
                StudentReportLine {
                    name: entry.student.name.clone(),
                    grade: entry.student.grade,
                    ad_hoc: entry.ad_hoc,
                    status: log.map(|l| l.status).unwrap_or(StudentStatus::Absent),
                    check_in_time: log.map(|l| l.timestamp),
                }
            })
            .collect();

        Ok(Self {
            bus_name: session.bus.name.clone(),
            driver: session.bus.driver_name.clone(),
            route_type: session.route_type,
            route_description: format!("{origin} TO {destination}"),
            date: Utc::now().format("%Y-%m-%d").to_string(),
            start_time: session.start_time,
            end_time: session.end_time,
            start_location_gps: format_gps(session.start_location),
            end_location_gps: format_gps(session.end_location),
            total_students: session.total_students(),
            students,
            incidents: session.incidents().to_vec(),
        })
    }

    /// Count of students reported absent, for log summaries.
    pub fn absent_count(&self) -> usize {
        self.students
            .iter()
            .filter(|s| s.status == StudentStatus::Absent)
            .count()
    }
}

fn format_gps(point: Option<GeoPoint>) -> String {
    match point {
        Some(p) => format!("{:.5}, {:.5}", p.lat, p.lng),
        None => "GPS Unavailable".to_string(),
    }
}

/// Turns a finished trip into human-readable summary text.
#[async_trait::async_trait]
pub trait ReportCompiler: Send + Sync {
    async fn compile(&self, report: &TripReport) -> Result<String>;
}

#[derive(Serialize)]
struct CompileRequest<'a> {
    prompt: String,
    trip: &'a TripReport,
}

/// Compiles reports by POSTing the trip snapshot plus a summary prompt to a
/// generative-text endpoint that answers `{"text": "..."}`.
pub struct HttpReportCompiler<C> {
    client: C,
    endpoint: String,
}

impl<C> HttpReportCompiler<C> {
    pub fn new(client: C, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

fn summary_prompt(report: &TripReport) -> String {
    format!(
        "Write a concise, professional trip summary for district transportation staff.\n\
         Start with the header: Trip Report: {} ({}).\n\
         State the route: {}.\n\
         Include start and end times, an Attendance section listing who was \
         on bus or dropped off and who was absent, and, only if incidents are \
         present, a highlighted INCIDENT REPORT section. Note the GPS fixes \
         ({} / {}) only if they look wildly off the expected route.",
        report.bus_name,
        report.route_type.label(),
        report.route_description,
        report.start_location_gps,
        report.end_location_gps,
    )
}

#[async_trait::async_trait]
impl<C: HttpClient> ReportCompiler for HttpReportCompiler<C> {
    async fn compile(&self, report: &TripReport) -> Result<String> {
        let request = CompileRequest {
            prompt: summary_prompt(report),
            trip: report,
        };

        debug!(bus = %report.bus_name, students = report.students.len(), "Requesting trip report");
        let json: serde_json::Value = post_json(&self.client, &self.endpoint, &request).await?;

        json["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("report service response missing 'text' field"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::{Bus, Student};

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
            grade: 11,
            photo_url: String::new(),
            bus_id: Some("BUS-A".to_string()),
            parent_phone: String::new(),
        }
    }

    fn ended_session() -> TripSession {
        let mut session = TripSession::new(bus(), RouteType::AmPickup);
        session
            .start(
                vec![student("S1", "Ana Ruiz"), student("S2", "Ben Cole")],
                Some(GeoPoint::new(34.0, -118.3)),
            )
            .unwrap();
        session
            .record_attendance(&student("S1", "Ana Ruiz"), Some(GeoPoint::new(34.1, -118.2)))
            .unwrap();
        session.end(None).unwrap();
        session
    }

    #[test]
    fn test_from_session_requires_ended() {
        let mut session = TripSession::new(bus(), RouteType::AmPickup);
        session.start(vec![], None).unwrap();

        assert!(matches!(
            TripReport::from_session(&session),
            Err(TripError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_unlogged_student_reported_absent() {
        let report = TripReport::from_session(&ended_session()).unwrap();

        let s2 = report.students.iter().find(|s| s.name == "Ben Cole").unwrap();
        assert_eq!(s2.status, StudentStatus::Absent);
        assert!(s2.check_in_time.is_none());
        assert_eq!(report.absent_count(), 1);
    }

    #[test]
    fn test_logged_student_keeps_latest_status() {
        let report = TripReport::from_session(&ended_session()).unwrap();

        let s1 = report.students.iter().find(|s| s.name == "Ana Ruiz").unwrap();
        assert_eq!(s1.status, StudentStatus::OnBus);
        assert!(s1.check_in_time.is_some());
    }

    #[test]
    fn test_route_description_swaps_for_pm() {
        let mut session = TripSession::new(bus(), RouteType::PmDropoff);
        session.start(vec![], None).unwrap();
        session.end(None).unwrap();

        let report = TripReport::from_session(&session).unwrap();
        assert!(report.route_description.starts_with(SCHOOL_ADDRESS));
        assert!(report.route_description.ends_with("Los Angeles, CA 90062"));
    }

    #[test]
    fn test_missing_gps_formats_placeholder() {
        let mut session = TripSession::new(bus(), RouteType::AmPickup);
        session.start(vec![], None).unwrap();
        session.end(None).unwrap();

        let report = TripReport::from_session(&session).unwrap();
        assert_eq!(report.start_location_gps, "GPS Unavailable");
        assert_eq!(report.end_location_gps, "GPS Unavailable");
    }

    #[test]
    fn test_prompt_names_bus_and_route() {
        let report = TripReport::from_session(&ended_session()).unwrap();
        let prompt = summary_prompt(&report);
        assert!(prompt.contains("Bus A - High School"));
        assert!(prompt.contains("AM"));
        assert!(prompt.contains(SCHOOL_ADDRESS));
    }
}
