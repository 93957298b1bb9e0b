//! Transport layer for serial device I/O
//!
//! A [`Transport`] is one open device: a byte stream with a readiness wait
//! and a line configuration call. A [`Connector`] opens transports by device
//! name, and the [`DeviceTable`] makes sure each device is opened once and
//! shared by every port pair that touches it.

use crate::core::types::Protocol;
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

pub mod mock;
mod tty;

pub use mock::{LoopbackHarness, MockOptions, MockPort};
pub use tty::{TtyConnector, TtyPort};

/// Line parameters applied at each baud transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineConfig {
    pub baud: u32,
    pub protocol: Protocol,
    pub flow_control: bool,
}

/// Open serial device shared between reader and writer threads
///
/// All methods take `&self`: the reader and the writer of a self-looped port
/// use the same handle concurrently, one reading and one writing.
pub trait Transport: Send + Sync {
    /// Device name this transport was opened for
    fn device(&self) -> &str;

    /// Apply line parameters and flush pending input and output.
    ///
    /// The synchronous branch logs its own failures and still returns `Ok`;
    /// a misconfigured line shows up as failed transfers.
    fn configure(&self, line: &LineConfig) -> Result<()>;

    /// Wait up to `timeout` for input. `Ok(false)` on timeout.
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// Read available bytes into `buf`
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `data`, returning the number of bytes accepted
    fn write(&self, data: &[u8]) -> io::Result<usize>;
}

/// Opens transports by device name
pub trait Connector: Send + Sync {
    fn open(&self, device: &str, protocol: Protocol) -> Result<Arc<dyn Transport>>;
}

/// Shared-ownership table of open devices keyed by device name
///
/// The first port pair to need a device opens it; later pairs (the reverse
/// direction of a cable, or a self-loop's writer side) adopt the same handle.
pub struct DeviceTable {
    connector: Arc<dyn Connector>,
    open: Mutex<HashMap<String, Arc<dyn Transport>>>,
}

impl DeviceTable {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Return the open handle for `device`, opening it on first use
    pub fn acquire(&self, device: &str, protocol: Protocol) -> Result<Arc<dyn Transport>> {
        let mut open = self.open.lock();
        if let Some(handle) = open.get(device) {
            log::debug!("Adopting open handle for {}", device);
            return Ok(Arc::clone(handle));
        }

        let handle = self.connector.open(device, protocol)?;
        log::info!("Opened {} ({})", device, protocol);
        open.insert(device.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    pub fn is_open(&self, device: &str) -> bool {
        self.open.lock().contains_key(device)
    }

    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.lock().is_empty()
    }
}
