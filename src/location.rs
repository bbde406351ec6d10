//! Positioning.
//!
//! GPS reads are best-effort: [`acquire`] bounds every read with a timeout
//! and resolves failure or expiry to `None`. Attendance correctness never
//! depends on a fix being available.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::trip::GeoPoint;

/// Default bound on a single GPS read.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Raw position read. May fail or take arbitrarily long; callers go
    /// through [`acquire`] to bound it.
    async fn current(&self) -> Result<GeoPoint>;
}

/// Reads a position with a bounded timeout. Failure and expiry both degrade
/// to `None`; the caller proceeds without a fix.
pub async fn acquire<P: LocationProvider + ?Sized>(
    provider: &P,
    limit: Duration,
) -> Option<GeoPoint> {
    match tokio::time::timeout(limit, provider.current()).await {
        Ok(Ok(point)) => Some(point),
        Ok(Err(e)) => {
            warn!(error = %e, "GPS read failed");
            None
        }
        Err(_) => {
            warn!(timeout_secs = limit.as_secs(), "GPS read timed out");
            None
        }
    }
}

/// A provider anchored at a fixed coordinate, drifting a little on each read
/// so observers see movement. Stands in for a real GPS device in the CLI
/// and in tests.
pub struct FixedProvider {
    lat: f64,
    lng: f64,
    reads: AtomicU32,
}

impl FixedProvider {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            reads: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl LocationProvider for FixedProvider {
    async fn current(&self) -> Result<GeoPoint> {
        let n = self.reads.fetch_add(1, Ordering::Relaxed) as f64;
        Ok(GeoPoint::new(self.lat + n * 0.0005, self.lng + n * 0.0003))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProvider;

    #[async_trait]
    impl LocationProvider for FailingProvider {
        async fn current(&self) -> Result<GeoPoint> {
            Err(anyhow::anyhow!("no GPS hardware"))
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl LocationProvider for HangingProvider {
        async fn current(&self) -> Result<GeoPoint> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(GeoPoint::new(0.0, 0.0))
        }
    }

    #[tokio::test]
    async fn test_acquire_returns_fix() {
        let provider = FixedProvider::new(34.0, -118.3);
        let fix = acquire(&provider, ACQUIRE_TIMEOUT).await;
        assert!(fix.is_some());
    }

    #[tokio::test]
    async fn test_acquire_degrades_on_failure() {
        assert!(acquire(&FailingProvider, ACQUIRE_TIMEOUT).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_degrades_on_timeout() {
        let fix = acquire(&HangingProvider, Duration::from_millis(100)).await;
        assert!(fix.is_none());
    }

    #[tokio::test]
    async fn test_fixed_provider_drifts_between_reads() {
        let provider = FixedProvider::new(34.0, -118.3);
        let a = provider.current().await.unwrap();
        let b = provider.current().await.unwrap();
        assert!(b.lat > a.lat);
    }
}
