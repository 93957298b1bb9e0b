//! Transmit/receive coordination for one port pair
//!
//! The reader thread drives a whole sweep per monitor cycle: it opens the
//! ports, walks the baud table, reconfigures the line at each rate (agreeing
//! with the reverse direction of a cable on who does it) and hands each
//! frame to the writer thread through the writer semaphore.

use super::RunOptions;
use super::receive::{FrameReceive, RxStrategy, receive_frame};
use crate::baud::{BaudEntry, frame_deadline};
use crate::core::sync::{CancelToken, Cancelled, Signals};
use crate::core::types::{LinkState, Protocol};
use crate::matrix::{Arrival, PortHandles, PortPair, Registry};
use crate::results::{Outcome, Reporter};
use crate::transport::{DeviceTable, LineConfig, Transport};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll period of a reader blocked at a cable handshake
const HANDSHAKE_POLL: Duration = Duration::from_millis(10);

/// 6.24 conformance pattern overlaid on the leading bytes of each frame
pub const ATC_TEST_STRING: &[u8] =
    b">The quick\xF7\xFEbrow\xBEn_fox jumps }over the~|azy dog?\xFE";

/// Why a sweep ended before walking its whole table
enum Abort {
    /// Outcome that ended the sweep
    Failed(Outcome),
    Cancelled,
}

impl From<Cancelled> for Abort {
    fn from(_: Cancelled) -> Self {
        Abort::Cancelled
    }
}

/// Shared state of every reader and writer thread
pub struct Coordinator {
    registry: Arc<Registry>,
    devices: Arc<DeviceTable>,
    reporter: Arc<dyn Reporter>,
    options: RunOptions,
}

impl Coordinator {
    pub fn new(
        registry: Arc<Registry>,
        devices: Arc<DeviceTable>,
        reporter: Arc<dyn Reporter>,
        options: RunOptions,
    ) -> Self {
        Self {
            registry,
            devices,
            reporter,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    /// Reader role: one full sweep of `pair`'s baud table.
    ///
    /// Returns the outcome of the last transfer, or the outcome that ended
    /// the sweep early.
    pub fn receive_cycle(&self, pair: &PortPair, signals: &Signals, cancel: &CancelToken) -> Outcome {
        let outcome = match self.open_ports(pair) {
            Ok(handles) => match self.sweep(pair, &handles, signals, cancel) {
                Ok(outcome) => outcome,
                Err(Abort::Failed(outcome)) => outcome,
                Err(Abort::Cancelled) => Outcome::Interrupt,
            },
            Err(outcome) => outcome,
        };

        if let Some(cable) = self.registry.cable(pair) {
            cable.end_sweep(pair.id());
        }
        pair.reader_state.set(LinkState::ReceiveComplete);
        outcome
    }

    /// Open or adopt the read side, then the write side if it differs
    fn open_ports(&self, pair: &PortPair) -> Result<PortHandles, Outcome> {
        if let Some(handles) = pair.handles() {
            return Ok(handles);
        }

        let rx = self
            .devices
            .acquire(pair.rx_device(), pair.protocol())
            .map_err(|e| {
                log::error!("{} cannot open {} for read: {}", pair.test_name(), pair.rx_device(), e);
                self.reporter.report(Outcome::RxError, None)
            })?;

        let tx = if pair.is_self_loop() {
            Arc::clone(&rx)
        } else {
            self.devices
                .acquire(pair.tx_device(), pair.protocol())
                .map_err(|e| {
                    log::error!(
                        "{} cannot open {} for write: {}",
                        pair.test_name(),
                        pair.tx_device(),
                        e
                    );
                    self.reporter.report(Outcome::TxError, None)
                })?
        };

        let handles = PortHandles { rx, tx };
        pair.set_handles(handles.clone());
        Ok(handles)
    }

    fn sweep(
        &self,
        pair: &PortPair,
        handles: &PortHandles,
        signals: &Signals,
        cancel: &CancelToken,
    ) -> Result<Outcome, Abort> {
        let plan = pair.plan();
        let overlay = self.options.atc_test_string.then_some(ATC_TEST_STRING);
        let mut last = Outcome::Pass;

        for (index, entry) in pair.rates().entries().iter().enumerate() {
            if let Some(rate) = self.options.baud_override {
                if rate != entry.rate() {
                    continue;
                }
            }
            if pair.protocol() == Protocol::Sync
                && !self
                    .registry
                    .sync_rule()
                    .permits(pair.rx_device(), pair.tx_device(), entry.rate())
            {
                continue;
            }

            pair.set_current_baud(index);
            self.configure_ports(pair, handles, entry.rate(), signals, cancel)?;

            for _ in 0..plan.iterations {
                for (slot, size) in (plan.min_frame..=plan.max_frame).enumerate() {
                    pair.prepare_frame(size, overlay);
                    last = self.transfer_frame(pair, handles, entry, slot, signals, cancel)?;

                    if !last.is_pass() && self.options.quick_fail {
                        log::warn!(
                            "{} quick fail: {} at {} bytes, {} baud",
                            pair.label(),
                            last,
                            size,
                            entry.rate()
                        );
                        return Err(Abort::Failed(last));
                    }
                }
            }
        }

        Ok(last)
    }

    fn line(&self, pair: &PortPair, rate: u32) -> LineConfig {
        LineConfig {
            baud: rate,
            protocol: pair.protocol(),
            flow_control: self.options.flow_control,
        }
    }

    fn init_port(&self, port: &dyn Transport, line: &LineConfig) {
        if let Err(e) = port.configure(line) {
            log::error!("{}: cannot configure {} baud: {}", port.device(), line.baud, e);
        }
    }

    fn init_both(&self, handles: &PortHandles, line: &LineConfig) {
        self.init_port(handles.rx.as_ref(), line);
        self.init_port(handles.tx.as_ref(), line);
    }

    /// Apply `rate` to the pair's ports. Across a cable with a scheduled
    /// reverse pair exactly one of the two readers does the work.
    fn configure_ports(
        &self,
        pair: &PortPair,
        handles: &PortHandles,
        rate: u32,
        signals: &Signals,
        cancel: &CancelToken,
    ) -> Result<(), Cancelled> {
        let line = self.line(pair, rate);

        if handles.is_shared() {
            self.init_port(handles.rx.as_ref(), &line);
            return Ok(());
        }

        let (Some(peer), Some(cable)) = (self.registry.concurrent_of(pair), self.registry.cable(pair))
        else {
            self.init_both(handles, &line);
            return Ok(());
        };

        match cable.arrive(pair.id()) {
            Arrival::Initialize { release_peer } => {
                self.init_both(handles, &line);
                if release_peer {
                    log::debug!("{} configured {} baud, releasing {}", pair.label(), rate, peer.label());
                    match peer.signals() {
                        Some(peer_signals) => peer_signals.concurrent.post(),
                        None => log::warn!("{} has no threads to release", peer.label()),
                    }
                }
            }
            Arrival::Wait => {
                let saved = pair.reader_state();
                pair.reader_state.set(LinkState::WaitingForConcurrent);
                log::debug!("{} waiting for {} to configure {} baud", pair.label(), peer.label(), rate);

                let waited = loop {
                    if signals.concurrent.wait_timeout(HANDSHAKE_POLL) {
                        break Ok(());
                    }
                    if cancel.is_cancelled() {
                        break Err(Cancelled);
                    }
                    if cable.abandoned(pair.id()) {
                        log::debug!("{} finished its sweep, {} configures alone", peer.label(), pair.label());
                        self.init_both(handles, &line);
                        break Ok(());
                    }
                };

                pair.reader_state.set(saved);
                waited?;
            }
        }
        Ok(())
    }

    /// One frame: wait for the writer, release it, receive
    fn transfer_frame(
        &self,
        pair: &PortPair,
        handles: &PortHandles,
        entry: &BaudEntry,
        slot: usize,
        signals: &Signals,
        cancel: &CancelToken,
    ) -> Result<Outcome, Abort> {
        let len = pair.frame_len();
        pair.bump_progress();

        let mut polls = 0;
        while pair.writer_state() != LinkState::WaitingForReceiver {
            if polls == self.options.writer_poll_limit {
                log::error!(
                    "receiver {} timeout transmitter {}, sz {}, baud {}",
                    pair.rx_device(),
                    pair.tx_device(),
                    len,
                    entry.rate()
                );
                return Err(Abort::Failed(self.reporter.report(Outcome::TxTimeout, None)));
            }
            cancel.sleep(self.options.writer_poll)?;
            polls += 1;
        }

        pair.reader_state.set(LinkState::Receiving);
        entry.mark_start(slot, Instant::now());
        // The writer must report waiting-for-receiver again before the next
        // frame, even if this one times out before it wakes
        pair.writer_state.set(LinkState::Scheduled);
        signals.writer.post();

        let expected = pair.tx_frame();
        let mut rx_buf = pair.rx_buffer();
        let outcome = receive_frame(
            self.options.strategy,
            FrameReceive {
                test_name: pair.test_name(),
                rx_device: pair.rx_device(),
                tx_device: pair.tx_device(),
                port: handles.rx.as_ref(),
                expected: &expected,
                actual: &mut rx_buf[..len],
                entry,
                slot,
                deadline: frame_deadline(len, entry.rate(), self.options.timeout_multiplier),
                reporter: self.reporter.as_ref(),
                cancel,
            },
        );
        if outcome == Outcome::Interrupt {
            return Err(Abort::Cancelled);
        }
        Ok(outcome)
    }

    /// Writer role: one blocking write of the prepared frame
    pub fn transmit_frame(&self, pair: &PortPair) -> Outcome {
        pair.writer_state.set(LinkState::Transmitting);
        let outcome = self.transmit(pair);
        pair.writer_state.set(LinkState::TransmitComplete);
        outcome
    }

    fn transmit(&self, pair: &PortPair) -> Outcome {
        let (Some(handles), Some(entry)) = (pair.handles(), pair.current_entry()) else {
            log::error!("{} writer woken before ports were opened", pair.label());
            return self.reporter.report(Outcome::TxError, None);
        };

        let frame = pair.tx_frame();
        match handles.tx.write(&frame) {
            Err(e) => {
                log::error!(
                    "{} cannot write to {}: {}, sz {}",
                    pair.test_name(),
                    pair.tx_device(),
                    e,
                    frame.len()
                );
                entry.record_tx(false);
                self.reporter.report(Outcome::TxError, None)
            }
            Ok(n) if n != frame.len() => {
                log::error!(
                    "{} info, {} returned write byte count {}, expected {}, baud {}",
                    pair.test_name(),
                    pair.tx_device(),
                    n,
                    frame.len(),
                    entry.rate()
                );
                // Only the reassembling receiver can still put the frame together
                if self.options.strategy == RxStrategy::Reassemble {
                    entry.record_tx(true);
                    self.reporter.report(Outcome::Pass, None)
                } else {
                    entry.record_tx(false);
                    self.reporter.report(Outcome::TxFail, None)
                }
            }
            Ok(_) => {
                entry.record_tx(true);
                self.reporter.report(Outcome::Pass, None)
            }
        }
    }
}
