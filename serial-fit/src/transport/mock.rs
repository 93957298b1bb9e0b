//! In-memory loopback cables for hardware-free runs and tests
//!
//! A [`LoopbackHarness`] holds one [`MockPort`] per device name and a route
//! table saying where bytes written to a device come out. Writes on a device
//! with no route are dropped, like an unplugged cable.
//!
//! Ports remember the baud rate they were last configured at; bytes crossing
//! a cable between two ports at different rates arrive garbled, so a missing
//! baud transition on either end shows up as failed frames.

use super::{Connector, LineConfig, Transport};
use crate::core::types::Protocol;
use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Fault injection knobs
#[derive(Debug, Clone, Copy, Default)]
pub struct MockOptions {
    /// Each read returns at most this many bytes
    pub max_read: Option<usize>,
    /// Each write accepts at most this many bytes
    pub max_write: Option<usize>,
    /// Flip every bit of the first byte of each write
    pub corrupt: bool,
    /// Each write blocks this long before the bytes go out
    pub write_stall: Option<Duration>,
}

struct Bench {
    options: MockOptions,
    routes: Mutex<HashMap<String, String>>,
    ports: Mutex<HashMap<String, Arc<MockPort>>>,
}

impl Bench {
    fn port(self: &Arc<Self>, device: &str) -> Arc<MockPort> {
        let mut ports = self.ports.lock();
        Arc::clone(ports.entry(device.to_string()).or_insert_with(|| {
            Arc::new(MockPort {
                device: device.to_string(),
                bench: Arc::downgrade(self),
                inbox: Mutex::new(VecDeque::new()),
                ready: Condvar::new(),
                baud: AtomicU32::new(0),
                opens: AtomicUsize::new(0),
                configs: Mutex::new(Vec::new()),
            })
        }))
    }
}

/// Set of simulated serial cables
#[derive(Clone)]
pub struct LoopbackHarness {
    bench: Arc<Bench>,
}

impl LoopbackHarness {
    pub fn new(options: MockOptions) -> Self {
        Self {
            bench: Arc::new(Bench {
                options,
                routes: Mutex::new(HashMap::new()),
                ports: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Bytes written on `tx` arrive on `rx`
    pub fn route(&self, tx: &str, rx: &str) {
        self.bench
            .routes
            .lock()
            .insert(tx.to_string(), rx.to_string());
    }

    /// Wire a port back to itself
    pub fn self_loop(&self, device: &str) {
        self.route(device, device);
    }

    /// Wire two ports to each other in both directions
    pub fn cable(&self, a: &str, b: &str) {
        self.route(a, b);
        self.route(b, a);
    }

    pub fn port(&self, device: &str) -> Arc<MockPort> {
        self.bench.port(device)
    }

    /// Number of times `device` was opened through the connector
    pub fn open_count(&self, device: &str) -> usize {
        self.bench
            .ports
            .lock()
            .get(device)
            .map_or(0, |p| p.opens.load(Ordering::Relaxed))
    }

    /// Line configurations applied to `device`, oldest first
    pub fn configurations(&self, device: &str) -> Vec<LineConfig> {
        self.bench
            .ports
            .lock()
            .get(device)
            .map_or_else(Vec::new, |p| p.configs.lock().clone())
    }
}

impl Connector for LoopbackHarness {
    fn open(&self, device: &str, _protocol: Protocol) -> Result<Arc<dyn Transport>> {
        let port = self.bench.port(device);
        port.opens.fetch_add(1, Ordering::Relaxed);
        Ok(port)
    }
}

/// One simulated serial device
pub struct MockPort {
    device: String,
    bench: Weak<Bench>,
    inbox: Mutex<VecDeque<u8>>,
    ready: Condvar,
    baud: AtomicU32,
    opens: AtomicUsize,
    configs: Mutex<Vec<LineConfig>>,
}

impl MockPort {
    /// Push bytes straight into this port's receive queue
    pub fn inject(&self, data: &[u8]) {
        let mut inbox = self.inbox.lock();
        inbox.extend(data);
        self.ready.notify_all();
    }

    pub fn pending(&self) -> usize {
        self.inbox.lock().len()
    }

    pub fn baud(&self) -> u32 {
        self.baud.load(Ordering::Acquire)
    }

    fn options(&self) -> MockOptions {
        self.bench
            .upgrade()
            .map_or_else(MockOptions::default, |b| b.options)
    }
}

impl Transport for MockPort {
    fn device(&self) -> &str {
        &self.device
    }

    fn configure(&self, line: &LineConfig) -> Result<()> {
        self.configs.lock().push(*line);
        self.baud.store(line.baud, Ordering::Release);
        self.inbox.lock().clear();
        Ok(())
    }

    fn wait_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut inbox = self.inbox.lock();
        if inbox.is_empty() {
            self.ready
                .wait_while_for(&mut inbox, |q| q.is_empty(), timeout);
        }
        Ok(!inbox.is_empty())
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.options().max_read.unwrap_or(usize::MAX);
        let mut inbox = self.inbox.lock();
        if inbox.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let n = buf.len().min(inbox.len()).min(limit);
        for (slot, byte) in buf.iter_mut().zip(inbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        let Some(bench) = self.bench.upgrade() else {
            return Err(io::ErrorKind::BrokenPipe.into());
        };
        let options = bench.options;
        if let Some(stall) = options.write_stall {
            std::thread::sleep(stall);
        }
        let n = data.len().min(options.max_write.unwrap_or(usize::MAX));

        let target = bench.routes.lock().get(&self.device).cloned();
        let Some(target) = target else {
            log::trace!("{}: no cable, {} bytes dropped", self.device, n);
            return Ok(n);
        };
        let peer = bench.port(&target);

        let mut frame = data[..n].to_vec();
        if options.corrupt {
            if let Some(first) = frame.first_mut() {
                *first ^= 0xFF;
            }
        }
        if peer.baud() != self.baud() {
            for byte in &mut frame {
                *byte ^= 0x5A;
            }
        }

        peer.inject(&frame);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(baud: u32) -> LineConfig {
        LineConfig {
            baud,
            protocol: Protocol::Async,
            flow_control: false,
        }
    }

    #[test]
    fn test_self_loop_delivers_to_same_port() {
        let harness = LoopbackHarness::new(MockOptions::default());
        harness.self_loop("sp1");
        let port = harness.port("sp1");
        port.configure(&line(9600)).unwrap();

        assert_eq!(port.write(b"hello").unwrap(), 5);
        assert!(port.wait_readable(Duration::from_millis(1)).unwrap());

        let mut buf = [0u8; 8];
        assert_eq!(port.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(
            port.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn test_cable_baud_mismatch_garbles() {
        let harness = LoopbackHarness::new(MockOptions::default());
        harness.cable("sp1", "sp2");
        let a = harness.port("sp1");
        let b = harness.port("sp2");
        a.configure(&line(9600)).unwrap();
        b.configure(&line(19200)).unwrap();

        a.write(&[0x20; 4]).unwrap();
        let mut buf = [0u8; 4];
        b.read(&mut buf).unwrap();
        assert_ne!(buf, [0x20; 4]);

        b.configure(&line(9600)).unwrap();
        a.write(&[0x20; 4]).unwrap();
        b.read(&mut buf).unwrap();
        assert_eq!(buf, [0x20; 4]);
        assert_eq!(harness.configurations("sp2").len(), 2);
    }

    #[test]
    fn test_fragmented_reads() {
        let harness = LoopbackHarness::new(MockOptions {
            max_read: Some(6),
            ..Default::default()
        });
        let port = harness.port("sp3");
        port.inject(&[7u8; 10]);

        let mut buf = [0u8; 10];
        assert_eq!(port.read(&mut buf).unwrap(), 6);
        assert_eq!(port.read(&mut buf[6..]).unwrap(), 4);
        assert_eq!(port.pending(), 0);
    }

    #[test]
    fn test_short_and_stalled_writes() {
        let harness = LoopbackHarness::new(MockOptions {
            max_write: Some(6),
            write_stall: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        harness.self_loop("sp5");
        let port = harness.port("sp5");

        let started = std::time::Instant::now();
        assert_eq!(port.write(&[1u8; 10]).unwrap(), 6);
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(port.pending(), 6);
    }

    #[test]
    fn test_unrouted_write_is_dropped() {
        let harness = LoopbackHarness::new(MockOptions::default());
        let port = harness.port("sp8");
        assert_eq!(port.write(b"lost").unwrap(), 4);
        assert!(!port.wait_readable(Duration::from_millis(5)).unwrap());
    }
}
