//! CLI entry point for the fleet attendance tool.
//!
//! Provides subcommands for syncing the roster from the SIS, searching
//! students, driving a scripted trip (the driver device flow), and watching
//! the live fleet state (the admin dashboard flow).

use anyhow::Result;
use clap::{Parser, Subcommand};
use fleet_attendance::error::TripError;
use fleet_attendance::fetch::{BasicClient, Bearer};
use fleet_attendance::history::{CompletedTrip, append_trip};
use fleet_attendance::live::{FileStore, LiveStateStore};
use fleet_attendance::location::{ACQUIRE_TIMEOUT, FixedProvider, acquire};
use fleet_attendance::report::{HttpReportCompiler, ReportCompiler, TripReport};
use fleet_attendance::roster::{Bus, RosterCache, SisClient, Student};
use fleet_attendance::runner::TripRunner;
use fleet_attendance::trip::{IncidentKind, RouteType, Severity, TripStatus};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "fleet_attendance")]
#[command(about = "School bus attendance and live fleet tracking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the student manifest for a bus from the SIS
    Roster {
        /// Bus to fetch the manifest for
        #[arg(long)]
        bus_id: String,
    },
    /// Search students in the SIS by ID or name fragment
    Search {
        #[arg(value_name = "QUERY")]
        query: String,
    },
    /// Run a scripted trip: scan, incident, wait, and end actions
    Drive {
        /// Bus running the trip
        #[arg(long)]
        bus_id: String,

        /// Route direction: am or pm
        #[arg(long, default_value = "am")]
        route: String,

        /// Action script, one action per line
        #[arg(value_name = "SCRIPT")]
        script: String,

        /// Seconds between location samples during waits
        #[arg(long, default_value_t = 5)]
        tick_secs: u64,
    },
    /// Poll the live fleet state and log active trips
    Watch {
        /// Poll interval in seconds
        #[arg(short, long, default_value_t = 5)]
        interval: u64,

        /// Number of polls (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        num_polls: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/fleet_attendance.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("fleet_attendance.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Roster { bus_id } => {
            let mut cache = RosterCache::new(connect_sis().await?);
            let manifest = cache.sync_manifest(&bus_id).await;

            for student in &manifest {
                info!(
                    student_id = %student.id,
                    name = %student.name,
                    grade = student.grade,
                    "Student"
                );
            }
            info!(bus_id = %bus_id, total = manifest.len(), "Manifest synced");
        }
        Commands::Search { query } => {
            let cache = RosterCache::new(connect_sis().await?);
            let results = cache.search(&query).await;

            for student in &results {
                info!(
                    student_id = %student.id,
                    name = %student.name,
                    bus_id = student.bus_id.as_deref().unwrap_or("unassigned"),
                    "Match"
                );
            }
            info!(query = %query, matches = results.len(), "Search complete");
        }
        Commands::Drive {
            bus_id,
            route,
            script,
            tick_secs,
        } => {
            let route_type = match route.to_lowercase().as_str() {
                "am" | "am_pickup" => RouteType::AmPickup,
                "pm" | "pm_dropoff" => RouteType::PmDropoff,
                other => anyhow::bail!("unknown route direction '{other}', expected am or pm"),
            };
            drive_trip(&bus_id, route_type, &script, tick_secs).await?;
        }
        Commands::Watch {
            interval,
            num_polls,
        } => {
            watch_fleet(interval, num_polls).await?;
        }
    }

    Ok(())
}

/// The district fleet. Bus-to-route assignments change rarely enough that a
/// static table has been sufficient so far.
fn fleet() -> Vec<Bus> {
    vec![
        Bus {
            id: "BUS-A".to_string(),
            name: "Bus A - High School".to_string(),
            driver_name: "John Smith".to_string(),
            endpoint_address: "1700 W 46th St, Los Angeles, CA 90062".to_string(),
            endpoint_lat: 34.0035,
            endpoint_lng: -118.306,
        },
        Bus {
            id: "BUS-B".to_string(),
            name: "Bus B - Middle School".to_string(),
            driver_name: "Jane Doe".to_string(),
            endpoint_address: "1700 W 46th St, Los Angeles, CA 90062".to_string(),
            endpoint_lat: 34.0035,
            endpoint_lng: -118.306,
        },
        Bus {
            id: "BUS-C".to_string(),
            name: "Bus C - Bell High".to_string(),
            driver_name: "Robert Johnson".to_string(),
            endpoint_address: "4206 Gage Ave, Bell, CA 90201".to_string(),
            endpoint_lat: 33.9738,
            endpoint_lng: -118.196,
        },
    ]
}

fn find_bus(bus_id: &str) -> Result<Bus> {
    fleet()
        .into_iter()
        .find(|b| b.id.eq_ignore_ascii_case(bus_id))
        .ok_or_else(|| anyhow::anyhow!("unknown bus '{bus_id}'"))
}

/// Builds the SIS client from environment credentials. Missing credentials
/// block only roster actions, never the trip flow.
async fn connect_sis() -> Result<SisClient> {
    let base_url =
        std::env::var("SIS_BASE_URL").unwrap_or_else(|_| "https://sis.example.org".to_string());
    let refresh_token =
        std::env::var("SIS_REFRESH_TOKEN").map_err(|_| TripError::NotAuthenticated)?;
    SisClient::connect(base_url, refresh_token).await
}

fn live_store() -> FileStore {
    let path =
        std::env::var("LIVE_STATE_PATH").unwrap_or_else(|_| "live_fleet.json".to_string());
    FileStore::new(path)
}

/// Runs one trip from an action script, publishing live state on every
/// action and on each location tick during waits.
#[tracing::instrument(skip(route_type, tick_secs))]
async fn drive_trip(
    bus_id: &str,
    route_type: RouteType,
    script: &str,
    tick_secs: u64,
) -> Result<()> {
    let bus = find_bus(bus_id)?;
    let store = Arc::new(live_store());
    let provider = FixedProvider::new(bus.endpoint_lat, bus.endpoint_lng);

    // Roster is best-effort: without SIS credentials the trip runs ad-hoc-only.
    let mut cache = match connect_sis().await {
        Ok(client) => Some(RosterCache::new(client)),
        Err(e) => {
            warn!(error = %e, "No roster connection, running ad-hoc-only trip");
            None
        }
    };
    let manifest = match cache.as_mut() {
        Some(cache) => cache.sync_manifest(&bus.id).await,
        None => Vec::new(),
    };

    let mut runner = TripRunner::new(bus.clone(), route_type, store);

    let start_fix = acquire(&provider, ACQUIRE_TIMEOUT).await;
    runner.start_trip(manifest, start_fix)?;

    let actions = std::fs::read_to_string(script)?;
    for (line_no, line) in actions.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.splitn(2, ' ');
        let verb = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();

        match verb {
            "scan" => {
                let student = resolve_student(cache.as_ref(), rest).await;
                let fix = acquire(&provider, ACQUIRE_TIMEOUT).await;
                match runner.scan(&student, fix) {
                    Ok(status) => info!(student_id = %student.id, status = ?status, "Scanned"),
                    Err(e) => warn!(error = %e, "Scan rejected"),
                }
            }
            "incident" => {
                let (kind, severity, description) = parse_incident(rest)
                    .ok_or_else(|| anyhow::anyhow!("bad incident at line {}", line_no + 1))?;
                match runner.report_incident(kind, severity, description) {
                    Ok(id) => info!(incident_id = %id, "Incident filed"),
                    Err(e) => warn!(error = %e, "Incident rejected"),
                }
            }
            "wait" => {
                let secs: u64 = rest.parse().unwrap_or(tick_secs);
                let mut remaining = secs;
                while remaining > 0 {
                    let step = remaining.min(tick_secs);
                    tokio::time::sleep(tokio::time::Duration::from_secs(step)).await;
                    let fix = acquire(&provider, ACQUIRE_TIMEOUT).await;
                    runner.sample_location(fix);
                    remaining -= step;
                }
            }
            "end" => break,
            other => {
                warn!(line = line_no + 1, verb = other, "Unknown script action, skipping");
            }
        }
    }

    let end_fix = acquire(&provider, ACQUIRE_TIMEOUT).await;
    let compiler = report_compiler();
    let (report, text) = runner.end_trip(end_fix, compiler.as_ref()).await?;

    println!("{text}");

    let history_path =
        std::env::var("HISTORY_PATH").unwrap_or_else(|_| "trip_history.csv".to_string());
    if let Err(e) = append_trip(&history_path, &CompletedTrip::from_report(&report)) {
        error!(error = %e, "Failed to append trip history");
    }

    Ok(())
}

/// Resolves a scanned ID against the roster cache, falling back to a bare
/// placeholder record so ad-hoc-only trips still work without a roster.
async fn resolve_student(cache: Option<&RosterCache<SisClient>>, id: &str) -> Student {
    if let Some(cache) = cache {
        if let Some(student) = cache.get_by_id(id) {
            return student.clone();
        }
        if let Some(student) = cache.search(id).await.into_iter().next() {
            return student;
        }
    }

    warn!(student_id = %id, "Student not found in roster, recording as unresolved");
    Student {
        id: id.to_string(),
        name: format!("Unresolved ({id})"),
        grade: 0,
        photo_url: String::new(),
        bus_id: None,
        parent_phone: String::new(),
    }
}

fn parse_incident(rest: &str) -> Option<(IncidentKind, Severity, String)> {
    let mut parts = rest.splitn(3, ' ');
    let kind = match parts.next()?.to_lowercase().as_str() {
        "behavior" => IncidentKind::Behavior,
        "mechanical" => IncidentKind::Mechanical,
        "medical" => IncidentKind::Medical,
        "delay" => IncidentKind::Delay,
        _ => IncidentKind::Other,
    };
    let severity = match parts.next()?.to_lowercase().as_str() {
        "high" => Severity::High,
        "medium" => Severity::Medium,
        _ => Severity::Low,
    };
    let description = parts.next().unwrap_or("Reported via script").to_string();
    Some((kind, severity, description))
}

/// Picks the report backend from the environment. Without one configured,
/// compilation fails fast and the runner substitutes placeholder text.
fn report_compiler() -> Box<dyn ReportCompiler> {
    match (
        std::env::var("REPORT_API_URL"),
        std::env::var("REPORT_API_KEY"),
    ) {
        (Ok(url), Ok(key)) => Box::new(HttpReportCompiler::new(
            Bearer::new(BasicClient::new(), key),
            url,
        )),
        _ => Box::new(UnconfiguredCompiler),
    }
}

struct UnconfiguredCompiler;

#[async_trait::async_trait]
impl ReportCompiler for UnconfiguredCompiler {
    async fn compile(&self, _report: &TripReport) -> Result<String> {
        Err(anyhow::anyhow!(
            "REPORT_API_URL / REPORT_API_KEY not set, cannot generate summary"
        ))
    }
}

/// Polls the live state file and logs every active trip, the admin
/// dashboard's data loop.
#[tracing::instrument]
async fn watch_fleet(interval: u64, num_polls: usize) -> Result<()> {
    let store = live_store();

    if num_polls == 0 {
        info!(interval, "Watching fleet indefinitely. Press Ctrl+C to stop.");
    }

    let mut polls = 0;
    loop {
        if num_polls > 0 && polls >= num_polls {
            break;
        }
        polls += 1;

        let trips = store.read_all()?;
        let active: Vec<_> = trips
            .values()
            .filter(|t| t.status == TripStatus::Active)
            .collect();

        for trip in &active {
            info!(
                bus_id = %trip.bus_id,
                driver = %trip.driver_name,
                on_bus = trip.student_count,
                total = trip.total_students,
                last_updated = %trip.last_updated,
                lat = trip.current_location.map(|l| l.lat),
                lng = trip.current_location.map(|l| l.lng),
                "Active trip"
            );
        }
        info!(
            active = active.len(),
            tracked = trips.len(),
            "Fleet snapshot"
        );

        if num_polls == 0 || polls < num_polls {
            tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;
        }
    }

    Ok(())
}
