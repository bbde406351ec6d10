//! Domain error kinds for the trip core.
//!
//! Every variant has a defined degraded path; none of them is fatal to the
//! process. IO-level failures (HTTP, filesystem) stay `anyhow` at the
//! application boundary.

use thiserror::Error;

use crate::trip::TripStatus;

#[derive(Debug, Error)]
pub enum TripError {
    /// An operation was attempted outside the session state it requires.
    /// Surfaced to the caller as a no-op notice; the session is unchanged.
    #[error("invalid state transition: cannot {action} while trip is {from:?}")]
    InvalidStateTransition { from: TripStatus, action: &'static str },

    /// Manifest fetch from the SIS failed. Callers degrade to an empty
    /// manifest and allow ad-hoc-only trips.
    #[error("roster provider unavailable: {0}")]
    RosterUnavailable(String),

    /// GPS read failed or timed out. Operations proceed with a null or
    /// sentinel location instead of failing.
    #[error("positioning unavailable")]
    PositioningUnavailable,

    /// The report service errored or timed out. The trip still ends; the
    /// caller substitutes placeholder text.
    #[error("report compilation failed: {0}")]
    ReportCompilationFailed(String),

    /// No SIS credentials in the environment. Blocks only roster sync and
    /// search, never the trip flow itself.
    #[error("not authenticated with the roster provider")]
    NotAuthenticated,
}

impl TripError {
    pub fn invalid_transition(from: TripStatus, action: &'static str) -> Self {
        TripError::InvalidStateTransition { from, action }
    }
}
