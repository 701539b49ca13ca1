//! Per-operation timings and byte counts

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Where one operation spent its time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HttpMetrics {
    /// Requests put on the wire; 2 after a clock-skew retry
    pub attempts: u32,
    /// Hashing the body for `Content-MD5`, when requested
    pub md5: Option<Duration>,
    /// Credential lookup and signing, summed over attempts
    pub sign: Duration,
    /// Transport send until response headers, summed over attempts
    pub dispatch: Duration,
    /// Response conversion, body streaming included
    pub convert: Duration,
    pub total: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl HttpMetrics {
    /// Body bytes per second over dispatch and conversion
    pub fn bytes_per_second(&self) -> f64 {
        let elapsed = (self.dispatch + self.convert).as_secs_f64();
        if elapsed > 0.0 {
            (self.bytes_sent + self.bytes_received) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn format_summary(&self) -> String {
        let md5 = self
            .md5
            .map(|d| format!("{}ms", d.as_millis()))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{} attempt(s), md5 {}, sign {}ms, dispatch {}ms, convert {}ms, total {}ms, {} B sent, {} B received, {:.0} B/s",
            self.attempts,
            md5,
            self.sign.as_millis(),
            self.dispatch.as_millis(),
            self.convert.as_millis(),
            self.total.as_millis(),
            self.bytes_sent,
            self.bytes_received,
            self.bytes_per_second()
        )
    }
}

/// Bytes seen by a body stream adapter
#[derive(Debug, Clone, Default)]
pub(crate) struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub(crate) fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
