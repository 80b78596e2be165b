//! Server-side bandwidth estimation
//!
//! Every delivered `.m4s` segment contributes one (bytes, duration) sample.
//! The EWMA smooths across deliveries and maps onto a coarse profile tag
//! the client polls via `/abr-profile`. The estimator never drives encoding
//! directly; it only publishes a hint.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Reported bandwidth before any segment has been observed.
pub const DEFAULT_EWMA_KBPS: f64 = 6000.0;

/// Smoothing factor kept from the previous estimate.
const EWMA_KEEP: f64 = 0.8;

/// Deliveries faster than this are clock noise, not signal.
const MIN_SAMPLE_SECONDS: f64 = 0.0001;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Profile {
    P0,
    P1,
    P2,
    P3,
}

impl Profile {
    /// Pure threshold mapping from estimated bandwidth.
    pub fn for_bandwidth(kbps: f64) -> Self {
        if kbps < 2500.0 {
            Profile::P0
        } else if kbps < 6000.0 {
            Profile::P1
        } else if kbps < 12_000.0 {
            Profile::P2
        } else {
            Profile::P3
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Profile::P0 => "p0",
            Profile::P1 => "p1",
            Profile::P2 => "p2",
            Profile::P3 => "p3",
        }
    }
}

struct Inner {
    ewma_kbps: f64,
    profile: Profile,
    updated_at: DateTime<Utc>,
    has_sample: bool,
}

/// Process-wide estimator: single writer per delivered segment, many
/// snapshot readers.
pub struct AbrEstimator {
    inner: Mutex<Inner>,
}

/// Wire shape of `/abr-profile`.
#[derive(Clone, Debug, Serialize)]
pub struct AbrSnapshot {
    pub profile: &'static str,
    pub estimated_kbps: f64,
    pub updated_at: String,
}

impl AbrEstimator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ewma_kbps: DEFAULT_EWMA_KBPS,
                profile: Profile::P1,
                updated_at: Utc::now(),
                has_sample: false,
            }),
        }
    }

    /// Fold one observed segment delivery into the estimate. The first
    /// accepted sample replaces the seed outright so a cold start cannot
    /// pin the profile.
    pub fn record_segment(&self, bytes: u64, duration_secs: f64) {
        if duration_secs <= MIN_SAMPLE_SECONDS {
            return;
        }
        let kbps = (bytes as f64 * 8.0) / 1000.0 / duration_secs;
        if kbps <= 0.0 {
            return;
        }

        let mut inner = self.inner.lock();
        if inner.has_sample {
            inner.ewma_kbps = EWMA_KEEP * inner.ewma_kbps + (1.0 - EWMA_KEEP) * kbps;
        } else {
            inner.ewma_kbps = kbps;
            inner.has_sample = true;
        }
        inner.profile = Profile::for_bandwidth(inner.ewma_kbps);
        inner.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> AbrSnapshot {
        let inner = self.inner.lock();
        AbrSnapshot {
            profile: inner.profile.as_str(),
            estimated_kbps: inner.ewma_kbps,
            updated_at: inner
                .updated_at
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    }
}

impl Default for AbrEstimator {
    fn default() -> Self {
        Self::new()
    }
}
