//! Core data types shared by the reader, writer and monitor threads.
//!
//! - [`Protocol`]: line discipline of a port pair
//! - [`LinkState`]: lifecycle state of one side of a port pair
//! - [`StateCell`]: lock-free cell holding a [`LinkState`]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Line protocol of a port pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Asynchronous UART, configured through termios
    Async,
    /// Synchronous serial, configured through the vendor ioctl
    Sync,
    /// Unconfigured line
    None,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Async => write!(f, "async"),
            Protocol::Sync => write!(f, "sync"),
            Protocol::None => write!(f, "none"),
        }
    }
}

/// Lifecycle state of the reader or the writer side of a port pair
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unscheduled = 0,
    Scheduled,
    WaitingForMonitor,
    WaitingForReceiver,
    WaitingForConcurrent,
    Transmitting,
    TransmitComplete,
    Receiving,
    ReceiveComplete,
}

impl LinkState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LinkState::Scheduled,
            2 => LinkState::WaitingForMonitor,
            3 => LinkState::WaitingForReceiver,
            4 => LinkState::WaitingForConcurrent,
            5 => LinkState::Transmitting,
            6 => LinkState::TransmitComplete,
            7 => LinkState::Receiving,
            8 => LinkState::ReceiveComplete,
            _ => LinkState::Unscheduled,
        }
    }

    /// True for every state except [`LinkState::Unscheduled`]
    pub fn is_scheduled(self) -> bool {
        self != LinkState::Unscheduled
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Unscheduled => "unscheduled",
            LinkState::Scheduled => "scheduled",
            LinkState::WaitingForMonitor => "waiting-for-monitor",
            LinkState::WaitingForReceiver => "waiting-for-receiver",
            LinkState::WaitingForConcurrent => "waiting-for-concurrent",
            LinkState::Transmitting => "transmitting",
            LinkState::TransmitComplete => "transmit-complete",
            LinkState::Receiving => "receiving",
            LinkState::ReceiveComplete => "receive-complete",
        };
        f.write_str(name)
    }
}

/// Atomic holder for a [`LinkState`]
///
/// Written by the owning thread, polled by the peer thread and the monitor.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: LinkState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> LinkState {
        LinkState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LinkState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(LinkState::Unscheduled)
    }
}
