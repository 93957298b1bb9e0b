//! Baud-rate tables with per-rate transfer counters.
//!
//! Each port pair sweeps its own [`BaudTable`], built from the rate list of
//! its receive port. Counters are written only by the pair's reader and
//! writer threads and read by the monitor without locking, so a snapshot
//! taken mid-transfer is advisory.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Rates swept on the asynchronous UARTs
pub const ASYNC_RATES: &[u32] = &[1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Rates swept on sp1s, sp2s and sp8s
pub const SYNC_RATES: &[u32] = &[19200, 38400, 57600, 76800, 153600];

/// Rates swept on sp3s and sp5s
pub const SYNC_HIGH_RATES: &[u32] = &[153600, 614400];

/// Rates understood by the synchronous driver. The position of a rate in
/// this table is the code passed in the configuration call.
pub const SYNC_BAUD_CODES: [u32; 11] = [
    1200, 2400, 4800, 9600, 19200, 38400, 57600, 76800, 115200, 153600, 614400,
];

/// Map a synchronous line rate to its driver code
pub fn sync_baud_code(rate: u32) -> Result<u8> {
    SYNC_BAUD_CODES
        .iter()
        .position(|&r| r == rate)
        .map(|code| code as u8)
        .ok_or(Error::UnsupportedBaud(rate))
}

/// Worst-case time for `len` bytes at `rate` baud with 10 bits per byte,
/// scaled by `multiplier`
pub fn frame_deadline(len: usize, rate: u32, multiplier: u32) -> Duration {
    let rate = u64::from(rate.max(1));
    let micros = (len as u64 * 10 * 1_000_000 / rate).max(1);
    Duration::from_micros(micros.saturating_mul(u64::from(multiplier.max(1))))
}

/// Start/end of one frame transfer
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTiming {
    pub start: Option<Instant>,
    pub end: Option<Instant>,
}

impl FrameTiming {
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

/// Point-in-time copy of one entry's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaudCounts {
    pub rx_ok: u32,
    pub rx_ng: u32,
    pub tx_ok: u32,
    pub tx_ng: u32,
}

impl BaudCounts {
    pub fn rx_total(&self) -> u32 {
        self.rx_ok + self.rx_ng
    }

    pub fn tx_total(&self) -> u32 {
        self.tx_ok + self.tx_ng
    }

    pub fn has_failures(&self) -> bool {
        self.rx_ng != 0 || self.tx_ng != 0
    }
}

/// One rate of a sweep and its cumulative counters
#[derive(Debug)]
pub struct BaudEntry {
    rate: u32,
    rx_ok: AtomicU32,
    rx_ng: AtomicU32,
    tx_ok: AtomicU32,
    tx_ng: AtomicU32,
    timings: Mutex<Vec<FrameTiming>>,
}

impl BaudEntry {
    pub fn new(rate: u32) -> Self {
        Self {
            rate,
            rx_ok: AtomicU32::new(0),
            rx_ng: AtomicU32::new(0),
            tx_ok: AtomicU32::new(0),
            tx_ng: AtomicU32::new(0),
            timings: Mutex::new(Vec::new()),
        }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn record_rx(&self, ok: bool) {
        let counter = if ok { &self.rx_ok } else { &self.rx_ng };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx(&self, ok: bool) {
        let counter = if ok { &self.tx_ok } else { &self.tx_ng };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> BaudCounts {
        BaudCounts {
            rx_ok: self.rx_ok.load(Ordering::Relaxed),
            rx_ng: self.rx_ng.load(Ordering::Relaxed),
            tx_ok: self.tx_ok.load(Ordering::Relaxed),
            tx_ng: self.tx_ng.load(Ordering::Relaxed),
        }
    }

    /// Size the timing array to `slots` frame sizes, clearing old samples
    pub fn allocate_timings(&self, slots: usize) {
        let mut timings = self.timings.lock();
        timings.clear();
        timings.resize(slots, FrameTiming::default());
    }

    pub fn release_timings(&self) {
        let mut timings = self.timings.lock();
        timings.clear();
        timings.shrink_to_fit();
    }

    pub fn timing_slots(&self) -> usize {
        self.timings.lock().len()
    }

    pub fn mark_start(&self, slot: usize, at: Instant) {
        if let Some(t) = self.timings.lock().get_mut(slot) {
            t.start = Some(at);
            t.end = None;
        }
    }

    pub fn mark_end(&self, slot: usize, at: Instant) {
        if let Some(t) = self.timings.lock().get_mut(slot) {
            t.end = Some(at);
        }
    }

    /// Mean over the slots holding a complete start/end pair
    pub fn mean_frame_time(&self) -> Option<Duration> {
        let timings = self.timings.lock();
        let samples: Vec<Duration> = timings.iter().filter_map(FrameTiming::elapsed).collect();
        if samples.is_empty() {
            return None;
        }
        let total: Duration = samples.iter().sum();
        Some(total / samples.len() as u32)
    }
}

/// Ordered list of rates swept by one port pair
#[derive(Debug)]
pub struct BaudTable {
    entries: Vec<BaudEntry>,
}

impl BaudTable {
    pub fn from_rates(rates: &[u32]) -> Self {
        Self {
            entries: rates.iter().copied().map(BaudEntry::new).collect(),
        }
    }

    pub fn entries(&self) -> &[BaudEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&BaudEntry> {
        self.entries.get(index)
    }

    pub fn find(&self, rate: u32) -> Option<&BaudEntry> {
        self.entries.iter().find(|e| e.rate == rate)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<(u32, BaudCounts)> {
        self.entries.iter().map(|e| (e.rate, e.counts())).collect()
    }

    pub fn allocate_timings(&self, slots: usize) {
        for entry in &self.entries {
            entry.allocate_timings(slots);
        }
    }

    pub fn release_timings(&self) {
        for entry in &self.entries {
            entry.release_timings();
        }
    }
}
