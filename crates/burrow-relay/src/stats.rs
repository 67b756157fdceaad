//! Per-relay counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Live counters shared between the relay tasks and its handles
#[derive(Debug)]
pub struct RelayStats {
    /// Bytes received from the control channel and written to sockets
    bytes_in: AtomicU64,
    /// Bytes read from sockets and sent over the control channel
    bytes_out: AtomicU64,
    active_streams: AtomicUsize,
    total_streams: AtomicU64,
    created_at: Instant,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub active_streams: usize,
    pub total_streams: u64,
    pub uptime_secs: u64,
}

impl RelayStats {
    pub(crate) fn new() -> Self {
        Self {
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            active_streams: AtomicUsize::new(0),
            total_streams: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn record_in(&self, n: usize) {
        self.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_out(&self, n: usize) {
        self.bytes_out.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn set_active_streams(&self, n: usize) {
        self.active_streams.store(n, Ordering::Relaxed);
    }

    pub(crate) fn stream_opened(&self) {
        self.total_streams.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            active_streams: self.active_streams.load(Ordering::Relaxed),
            total_streams: self.total_streams.load(Ordering::Relaxed),
            uptime_secs: self.created_at.elapsed().as_secs(),
        }
    }
}
