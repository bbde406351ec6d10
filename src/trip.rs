//! Trip session state machine.
//!
//! One [`TripSession`] covers one bus, one route direction, one day. Driver
//! actions mutate it while `Active`; once `Ended` it is immutable and ready
//! for report compilation. Guard failures are returned as
//! [`TripError::InvalidStateTransition`], never panics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::TripError;
use crate::roster::{Bus, Student};

/// A GPS fix. `lat`/`lng` of `0.0` is the sentinel written when positioning
/// was unavailable at the moment of a check-in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            timestamp: Utc::now(),
        }
    }

    /// The sentinel fix recorded when no GPS read was available.
    pub fn unavailable() -> Self {
        Self::new(0.0, 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudentStatus {
    Pending,
    OnBus,
    DroppedOff,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteType {
    AmPickup,
    PmDropoff,
}

impl RouteType {
    pub fn label(&self) -> &'static str {
        match self {
            RouteType::AmPickup => "AM",
            RouteType::PmDropoff => "PM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    NotStarted,
    Active,
    Ended,
}

/// One attendance fact. The log holds at most one entry per student; each
/// check-in/check-out replaces the previous entry, so the stored entry is
/// always the latest-timestamp one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    pub student_id: String,
    pub status: StudentStatus,
    pub timestamp: DateTime<Utc>,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncidentKind {
    Behavior,
    Mechanical,
    Medical,
    Delay,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Append-only incident record; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub bus_id: String,
    pub driver_name: String,
    pub timestamp: DateTime<Utc>,
    pub kind: IncidentKind,
    pub severity: Severity,
    pub description: String,
}

/// A student expected on this trip. `ad_hoc` marks students checked in
/// despite not being assigned to the active bus; membership is scoped to
/// this session only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub student: Student,
    pub ad_hoc: bool,
}

/// Aggregate root for one trip.
#[derive(Debug, Clone)]
pub struct TripSession {
    pub bus: Bus,
    pub route_type: RouteType,
    pub status: TripStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub start_location: Option<GeoPoint>,
    pub end_time: Option<DateTime<Utc>>,
    pub end_location: Option<GeoPoint>,
    manifest: Vec<ManifestEntry>,
    attendance: HashMap<String, AttendanceEntry>,
    incidents: Vec<Incident>,
}

impl TripSession {
    pub fn new(bus: Bus, route_type: RouteType) -> Self {
        Self {
            bus,
            route_type,
            status: TripStatus::NotStarted,
            start_time: None,
            start_location: None,
            end_time: None,
            end_location: None,
            manifest: Vec::new(),
            attendance: HashMap::new(),
            incidents: Vec::new(),
        }
    }

    /// Activates the session with the assigned manifest. A `None` start
    /// location means positioning was unavailable; the trip starts anyway.
    pub fn start(
        &mut self,
        manifest: Vec<Student>,
        start_location: Option<GeoPoint>,
    ) -> Result<(), TripError> {
        if self.status != TripStatus::NotStarted {
            return Err(TripError::invalid_transition(self.status, "start"));
        }

        if start_location.is_none() {
            tracing::warn!(bus_id = %self.bus.id, "Trip starting without a GPS fix");
        }

        self.manifest = manifest
            .into_iter()
            .map(|student| ManifestEntry {
                student,
                ad_hoc: false,
            })
            .collect();
        self.attendance.clear();
        self.incidents.clear();
        self.status = TripStatus::Active;
        self.start_time = Some(Utc::now());
        self.start_location = start_location;
        Ok(())
    }

    /// Records a scan or manual check-in, toggling the student between
    /// `OnBus` and `DroppedOff`. Students not on the manifest are added as
    /// ad-hoc first. Returns the status written.
    pub fn record_attendance(
        &mut self,
        student: &Student,
        location: Option<GeoPoint>,
    ) -> Result<StudentStatus, TripError> {
        if self.status != TripStatus::Active {
            return Err(TripError::invalid_transition(self.status, "record attendance"));
        }

        if !self.manifest.iter().any(|m| m.student.id == student.id) {
            tracing::info!(
                student_id = %student.id,
                bus_id = %self.bus.id,
                "Ad-hoc boarding: student not assigned to this bus"
            );
            self.manifest.push(ManifestEntry {
                student: student.clone(),
                ad_hoc: true,
            });
        }

        let new_status = match self.current_status(&student.id) {
            StudentStatus::OnBus => StudentStatus::DroppedOff,
            _ => StudentStatus::OnBus,
        };

        self.attendance.insert(
            student.id.clone(),
            AttendanceEntry {
                student_id: student.id.clone(),
                status: new_status,
                timestamp: Utc::now(),
                location: location.unwrap_or_else(GeoPoint::unavailable),
            },
        );

        Ok(new_status)
    }

    /// Appends an incident and returns its fresh ID. Does not affect
    /// attendance counts.
    pub fn report_incident(
        &mut self,
        kind: IncidentKind,
        severity: Severity,
        description: String,
    ) -> Result<String, TripError> {
        if self.status != TripStatus::Active {
            return Err(TripError::invalid_transition(self.status, "report incident"));
        }

        let id = Uuid::new_v4().to_string();
        self.incidents.push(Incident {
            id: id.clone(),
            bus_id: self.bus.id.clone(),
            driver_name: self.bus.driver_name.clone(),
            timestamp: Utc::now(),
            kind,
            severity,
            description,
        });

        Ok(id)
    }

    /// Ends the trip. After this, every mutation is rejected. Students never
    /// logged are reported `Absent` at compile time; no entry is written back.
    pub fn end(&mut self, end_location: Option<GeoPoint>) -> Result<(), TripError> {
        if self.status != TripStatus::Active {
            return Err(TripError::invalid_transition(self.status, "end"));
        }

        self.status = TripStatus::Ended;
        self.end_time = Some(Utc::now());
        self.end_location = end_location;
        Ok(())
    }

    /// The authoritative status for a student: the latest log entry, or
    /// `Pending` if the student was never logged.
    pub fn current_status(&self, student_id: &str) -> StudentStatus {
        self.attendance
            .get(student_id)
            .map(|entry| entry.status)
            .unwrap_or(StudentStatus::Pending)
    }

    /// Count of students currently on the bus.
    pub fn on_bus_count(&self) -> usize {
        self.attendance
            .values()
            .filter(|e| e.status == StudentStatus::OnBus)
            .count()
    }

    /// Manifest size, ad-hoc additions included.
    pub fn total_students(&self) -> usize {
        self.manifest.len()
    }

    pub fn manifest(&self) -> &[ManifestEntry] {
        &self.manifest
    }

    pub fn incidents(&self) -> &[Incident] {
        &self.incidents
    }

    pub fn attendance_entries(&self) -> impl Iterator<Item = &AttendanceEntry> {
        self.attendance.values()
    }

    pub fn attendance_for(&self, student_id: &str) -> Option<&AttendanceEntry> {
        self.attendance.get(student_id)
    }

    /// Manifest students with no log entry at all. Their `Absent` status is
    /// derived for display and reports, never stored.
    pub fn unlogged_students(&self) -> Vec<&Student> {
        self.manifest
            .iter()
            .filter(|m| !self.attendance.contains_key(&m.student.id))
            .map(|m| &m.student)
            .collect()
    }

    /// Builds the read-only projection for external observers.
    pub fn live_state(&self, current_location: Option<GeoPoint>) -> LiveTripState {
        let mut logs: Vec<AttendanceEntry> = self.attendance.values().cloned().collect();
        logs.sort_by_key(|e| e.timestamp);

        LiveTripState {
            bus_id: self.bus.id.clone(),
            driver_name: self.bus.driver_name.clone(),
            route_type: self.route_type,
            start_time: self.start_time.unwrap_or_else(Utc::now),
            last_updated: Utc::now(),
            current_location,
            logs,
            student_count: self.on_bus_count(),
            total_students: self.total_students(),
            status: self.status,
        }
    }
}

/// Read-only projection of a session, regenerated on every change and
/// published for remote observers. Never independently mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTripState {
    pub bus_id: String,
    pub driver_name: String,
    pub route_type: RouteType,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub current_location: Option<GeoPoint>,
    pub logs: Vec<AttendanceEntry>,
    pub student_count: usize,
    pub total_students: usize,
    pub status: TripStatus,
}
