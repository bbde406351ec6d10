//! Trip history persistence.
//!
//! Finished trips are appended as flat rows to a CSV file, one file per
//! deployment, for the admin history table.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

use crate::report::TripReport;
use crate::trip::{RouteType, StudentStatus};

/// One finished trip, flattened for CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTrip {
    pub id: String,
    pub bus_name: String,
    pub driver_name: String,
    pub route_type: RouteType,
    pub date: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_students: usize,
    pub dropped_off: usize,
    pub still_on_bus: usize,
    pub absent: usize,
    pub incident_count: usize,
}

impl CompletedTrip {
    pub fn from_report(report: &TripReport) -> Self {
        let count = |status: StudentStatus| {
            report.students.iter().filter(|s| s.status == status).count()
        };

        Self {
            id: Uuid::new_v4().to_string(),
            bus_name: report.bus_name.clone(),
            driver_name: report.driver.clone(),
            route_type: report.route_type,
            date: report.date.clone(),
            start_time: report.start_time,
            end_time: report.end_time,
            total_students: report.total_students,
            dropped_off: count(StudentStatus::DroppedOff),
            still_on_bus: count(StudentStatus::OnBus),
            absent: count(StudentStatus::Absent),
            incident_count: report.incidents.len(),
        }
    }
}

/// Appends a [`CompletedTrip`] as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_trip(path: &str, trip: &CompletedTrip) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending trip history record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(trip)?;
    writer.flush()?;

    Ok(())
}

/// Reads all history rows back from a CSV file. A missing file reads as an
/// empty history.
pub fn load_history(path: &str) -> Result<Vec<CompletedTrip>> {
    if !Path::new(path).exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut trips = Vec::new();
    for row in reader.deserialize() {
        trips.push(row?);
    }
    Ok(trips)
}
