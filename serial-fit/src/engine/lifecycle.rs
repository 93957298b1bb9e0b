//! Reader/writer thread lifecycle for one scheduled port pair

use super::coordinator::Coordinator;
use crate::core::sync::{CancelSource, CancelToken, Signals};
use crate::core::types::LinkState;
use crate::error::{Error, Result};
use crate::matrix::PortPair;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// The two worker threads of a scheduled port pair and the semaphores
/// between them and the monitor
pub struct PairThreads {
    id: usize,
    label: String,
    signals: Arc<Signals>,
    cancel: CancelSource,
    reader_handle: Option<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<()>>,
}

impl PairThreads {
    /// Allocate timing arrays, create the semaphores and spawn both threads
    pub fn start(coordinator: &Arc<Coordinator>, id: usize) -> Result<Self> {
        let pair = coordinator
            .registry()
            .get(id)
            .ok_or_else(|| Error::Other(format!("no port pair with id {}", id)))?;

        pair.rates().allocate_timings(pair.plan().max_frame);
        let signals = Arc::new(Signals::default());
        pair.install_signals(Arc::clone(&signals));

        let mut threads = Self {
            id,
            label: pair.label(),
            signals: Arc::clone(&signals),
            cancel: CancelSource::new(),
            reader_handle: None,
            writer_handle: None,
        };

        let reader_coordinator = Arc::clone(coordinator);
        let reader_signals = Arc::clone(&signals);
        let reader_cancel = threads.cancel.token();
        let spawned = thread::Builder::new()
            .name(format!("rx-{}", pair.rx_device()))
            .spawn(move || reader_loop(&reader_coordinator, id, &reader_signals, &reader_cancel));
        match spawned {
            Ok(handle) => threads.reader_handle = Some(handle),
            Err(e) => {
                threads.release(pair);
                return Err(Error::ThreadSpawn(format!("reader for {}: {}", pair.label(), e)));
            }
        }

        let writer_coordinator = Arc::clone(coordinator);
        let writer_signals = Arc::clone(&signals);
        let writer_cancel = threads.cancel.token();
        let spawned = thread::Builder::new()
            .name(format!("tx-{}", pair.tx_device()))
            .spawn(move || writer_loop(&writer_coordinator, id, &writer_signals, &writer_cancel));
        match spawned {
            Ok(handle) => threads.writer_handle = Some(handle),
            Err(e) => {
                threads.release(pair);
                return Err(Error::ThreadSpawn(format!("writer for {}: {}", pair.label(), e)));
            }
        }

        log::debug!("{} threads started", threads.label);
        Ok(threads)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn signals(&self) -> &Arc<Signals> {
        &self.signals
    }

    /// Stop both threads, join them and free the timing arrays.
    ///
    /// Idempotent. A thread that ended by panicking rather than by
    /// cancellation is logged as a warning.
    pub fn cancel(&mut self) -> &mut Self {
        self.cancel.cancel();

        for (role, handle) in [
            ("write", self.writer_handle.take()),
            ("read", self.reader_handle.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    log::warn!("{} {} thread was not cancelled", self.label, role);
                }
            }
        }
        self
    }

    /// Release the per-run resources held by the port pair
    pub(crate) fn release(&mut self, pair: &PortPair) {
        self.cancel();
        pair.remove_signals();
        pair.rates().release_timings();
        log::debug!("{} threads cancelled", self.label);
    }
}

impl Drop for PairThreads {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn reader_loop(coordinator: &Coordinator, id: usize, signals: &Signals, cancel: &CancelToken) {
    let Some(pair) = coordinator.registry().get(id) else {
        log::warn!("no port pair with id {}, reader exiting", id);
        return;
    };

    loop {
        pair.reader_state.set(LinkState::WaitingForMonitor);
        if signals.reader.wait(cancel).is_err() {
            break;
        }
        let outcome = coordinator.receive_cycle(pair, signals, cancel);
        log::debug!("{} cycle done: {}", pair.label(), outcome);
        signals.monitor.post();
    }
    log::debug!("{} reader exiting", pair.label());
}

fn writer_loop(coordinator: &Coordinator, id: usize, signals: &Signals, cancel: &CancelToken) {
    let Some(pair) = coordinator.registry().get(id) else {
        log::warn!("no port pair with id {}, writer exiting", id);
        return;
    };

    loop {
        pair.writer_state.set(LinkState::WaitingForReceiver);
        if signals.writer.wait(cancel).is_err() {
            break;
        }
        pair.writer_state.set(LinkState::Scheduled);
        coordinator.transmit_frame(pair);
    }
    log::debug!("{} writer exiting", pair.label());
}
