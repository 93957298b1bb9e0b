//! Port-pair descriptor: one directional loopback test

use crate::baud::{BaudEntry, BaudTable};
use crate::core::sync::Signals;
use crate::core::types::{LinkState, Protocol, StateCell};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Largest frame a port pair transfers, and the size of its buffers
pub const MAX_TRANSFER: usize = 1024;

/// Read and write handles of a port pair
///
/// For a self-loop both fields hold the same `Arc`.
#[derive(Clone)]
pub struct PortHandles {
    pub rx: Arc<dyn Transport>,
    pub tx: Arc<dyn Transport>,
}

impl PortHandles {
    pub fn is_shared(&self) -> bool {
        Arc::ptr_eq(&self.rx, &self.tx)
    }
}

/// Frame size range and iteration count requested by the schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub min_frame: usize,
    pub max_frame: usize,
    pub iterations: u32,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            min_frame: 32,
            max_frame: 32,
            iterations: 1,
        }
    }
}

/// One directional test between a receive and a transmit port
pub struct PortPair {
    id: usize,
    test_name: &'static str,
    rx_device: String,
    tx_device: String,
    protocol: Protocol,
    plan: Plan,
    rates: BaudTable,

    pub(crate) reader_state: StateCell,
    pub(crate) writer_state: StateCell,

    tx_buf: Mutex<Vec<u8>>,
    rx_buf: Mutex<Vec<u8>>,
    frame_len: AtomicUsize,
    current_baud: AtomicUsize,
    progress: AtomicU64,

    handles: Mutex<Option<PortHandles>>,
    signals: Mutex<Option<Arc<Signals>>>,
}

impl PortPair {
    pub fn new(
        test_name: &'static str,
        rx_device: &str,
        tx_device: &str,
        protocol: Protocol,
        rates: &[u32],
    ) -> Self {
        Self {
            id: 0,
            test_name,
            rx_device: rx_device.to_string(),
            tx_device: tx_device.to_string(),
            protocol,
            plan: Plan::default(),
            rates: BaudTable::from_rates(rates),
            reader_state: StateCell::default(),
            writer_state: StateCell::default(),
            tx_buf: Mutex::new(vec![0; MAX_TRANSFER]),
            rx_buf: Mutex::new(vec![0; MAX_TRANSFER]),
            frame_len: AtomicUsize::new(0),
            current_baud: AtomicUsize::new(0),
            progress: AtomicU64::new(0),
            handles: Mutex::new(None),
            signals: Mutex::new(None),
        }
    }

    pub(crate) fn set_id(&mut self, id: usize) {
        self.id = id;
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn test_name(&self) -> &'static str {
        self.test_name
    }

    pub fn rx_device(&self) -> &str {
        &self.rx_device
    }

    pub fn tx_device(&self) -> &str {
        &self.tx_device
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn plan(&self) -> Plan {
        self.plan
    }

    pub fn rates(&self) -> &BaudTable {
        &self.rates
    }

    pub fn is_self_loop(&self) -> bool {
        self.rx_device == self.tx_device
    }

    /// `tx->rx` label used in statistics and the failure summary
    pub fn label(&self) -> String {
        format!("{}->{}", self.tx_device, self.rx_device)
    }

    pub fn reader_state(&self) -> LinkState {
        self.reader_state.get()
    }

    pub fn writer_state(&self) -> LinkState {
        self.writer_state.get()
    }

    /// Both sides have been scheduled by a configuration line
    pub fn is_scheduled(&self) -> bool {
        self.reader_state().is_scheduled() && self.writer_state().is_scheduled()
    }

    /// Mark both sides scheduled with `plan`
    pub(crate) fn schedule(&mut self, plan: Plan) {
        self.plan = plan;
        self.reader_state.set(LinkState::Scheduled);
        self.writer_state.set(LinkState::Scheduled);
    }

    pub fn handles(&self) -> Option<PortHandles> {
        self.handles.lock().clone()
    }

    pub(crate) fn set_handles(&self, handles: PortHandles) {
        *self.handles.lock() = Some(handles);
    }

    pub fn signals(&self) -> Option<Arc<Signals>> {
        self.signals.lock().clone()
    }

    pub(crate) fn install_signals(&self, signals: Arc<Signals>) {
        *self.signals.lock() = Some(signals);
    }

    pub(crate) fn remove_signals(&self) -> Option<Arc<Signals>> {
        self.signals.lock().take()
    }

    /// Frame size currently being transferred
    pub fn frame_len(&self) -> usize {
        self.frame_len.load(Ordering::Acquire)
    }

    /// Fill the transmit buffer for a `len`-byte frame and clear the receive
    /// buffer. Every byte carries the frame size; `overlay` replaces the
    /// leading bytes.
    pub(crate) fn prepare_frame(&self, len: usize, overlay: Option<&[u8]>) {
        let len = len.min(MAX_TRANSFER);
        {
            let mut tx = self.tx_buf.lock();
            tx[..len].fill(len as u8);
            if let Some(pattern) = overlay {
                let n = pattern.len().min(len);
                tx[..n].copy_from_slice(&pattern[..n]);
            }
        }
        self.rx_buf.lock()[..len].fill(0);
        self.frame_len.store(len, Ordering::Release);
    }

    /// Copy of the frame currently in the transmit buffer
    pub fn tx_frame(&self) -> Vec<u8> {
        let len = self.frame_len();
        self.tx_buf.lock()[..len].to_vec()
    }

    pub(crate) fn rx_buffer(&self) -> parking_lot::MutexGuard<'_, Vec<u8>> {
        self.rx_buf.lock()
    }

    pub(crate) fn set_current_baud(&self, index: usize) {
        self.current_baud.store(index, Ordering::Release);
    }

    /// Baud entry of the rate being swept
    pub fn current_entry(&self) -> Option<&BaudEntry> {
        self.rates.get(self.current_baud.load(Ordering::Acquire))
    }

    /// Counter bumped once per attempted frame; used to detect stuck readers
    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    pub(crate) fn bump_progress(&self) {
        self.progress.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for PortPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortPair")
            .field("id", &self.id)
            .field("test_name", &self.test_name)
            .field("rx_device", &self.rx_device)
            .field("tx_device", &self.tx_device)
            .field("protocol", &self.protocol)
            .field("plan", &self.plan)
            .field("reader_state", &self.reader_state())
            .field("writer_state", &self.writer_state())
            .finish()
    }
}
