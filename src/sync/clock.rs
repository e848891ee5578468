//! Clock offset estimation between this machine and the server.
//!
//! Uses Cristian's algorithm: each probe records the round trip time and
//! the difference between the local midpoint and the reported server time.
//! The probe with the smallest round trip wins.

use crate::sync::listener::WorkspaceListener;
use crate::sync::transport::TransportError;
use crate::sync::types::Severity;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Number of round-trip probes per estimate.
pub const PROBE_COUNT: usize = 5;

/// Offsets smaller than this are measurement noise and treated as zero.
pub const NOISE_THRESHOLD_MS: i64 = 3;

/// Offsets larger than this are worth telling the user about.
pub const REPORT_THRESHOLD_MS: i64 = 10_000;

/// Something that can report the server's current time in milliseconds.
#[async_trait]
pub trait TimeSource: Send + Sync {
    async fn server_time(&self) -> Result<i64, TransportError>;
}

/// One probe. Ordering is by round trip first, then by offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockSample {
    pub rtt: i64,
    pub diff: i64,
}

impl ClockSample {
    pub fn from_probe(sent_at: i64, arrived_at: i64, server_time: i64) -> Self {
        Self {
            rtt: arrived_at - sent_at,
            diff: (sent_at + arrived_at) / 2 - server_time,
        }
    }
}

/// Pick the sample with the smallest round trip (ties: smallest offset).
pub fn select_sample(samples: &[ClockSample]) -> Option<ClockSample> {
    samples.iter().min().copied()
}

/// Process-wide offset added to remote timestamps to make them local.
#[derive(Debug, Default)]
pub struct ClockOffset(AtomicI64);

impl ClockOffset {
    pub fn new(offset_ms: i64) -> Self {
        Self(AtomicI64::new(offset_ms))
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, offset_ms: i64) {
        self.0.store(offset_ms, Ordering::SeqCst);
    }

    /// Convert a remote timestamp to local time. Unknown stays unknown.
    pub fn to_local(&self, remote_ms: Option<i64>) -> Option<i64> {
        remote_ms.map(|ms| ms + self.get())
    }

    /// Convert a local timestamp to the server's clock.
    pub fn to_remote(&self, local_ms: i64) -> i64 {
        local_ms - self.get()
    }
}

pub struct ClockSync {
    offset: Arc<ClockOffset>,
    listener: Arc<dyn WorkspaceListener>,
}

impl ClockSync {
    pub fn new(offset: Arc<ClockOffset>, listener: Arc<dyn WorkspaceListener>) -> Self {
        Self { offset, listener }
    }

    /// Run [`PROBE_COUNT`] probes and store the resulting offset.
    ///
    /// Probe failures propagate; retrying is the caller's business.
    pub async fn estimate(&self, source: &dyn TimeSource) -> Result<i64, TransportError> {
        let mut samples = Vec::with_capacity(PROBE_COUNT);
        for _ in 0..PROBE_COUNT {
            let sent_at = now_millis();
            let server_time = source.server_time().await?;
            let arrived_at = now_millis();
            samples.push(ClockSample::from_probe(sent_at, arrived_at, server_time));
        }
        debug!("Clock probes: {:?}", samples);

        let diff = select_sample(&samples).map(|s| s.diff).unwrap_or_default();
        if diff.abs() > REPORT_THRESHOLD_MS {
            self.listener.log(
                Severity::Info,
                &format!("Server time difference is {}", format_offset(diff)),
            );
        }

        let offset = if diff.abs() < NOISE_THRESHOLD_MS { 0 } else { diff };
        self.offset.set(offset);
        Ok(offset)
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Human readable offset, e.g. `-1h 02m 03s 004ms`.
pub fn format_offset(diff_ms: i64) -> String {
    let mut out = String::new();
    if diff_ms < 0 {
        out.push('-');
    }
    let mut rest = diff_ms.unsigned_abs();
    let ms = rest % 1000;
    rest /= 1000;
    let s = rest % 60;
    rest /= 60;
    let m = rest % 60;
    let h = rest / 60;

    if h > 0 {
        let _ = write!(out, "{}h ", h);
    }
    if m > 0 || h > 0 {
        let _ = write!(out, "{:02}m ", m);
    }
    if m > 0 || h > 0 || s > 0 {
        let _ = write!(out, "{:02}s ", s);
    }
    let _ = write!(out, "{:03}ms", ms);
    out
}
