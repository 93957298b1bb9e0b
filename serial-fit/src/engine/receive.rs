//! Receive strategies
//!
//! Each strategy reads exactly one frame within a per-wait deadline, compares
//! it with the transmitted frame and updates the baud entry's rx counters.
//! Every path bumps exactly one of `rx_ok`/`rx_ng` and reports exactly one
//! outcome.

use crate::baud::BaudEntry;
use crate::core::sync::CancelToken;
use crate::results::{Outcome, Reporter};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io;
use std::time::{Duration, Instant};

/// Consecutive "nothing available" reads tolerated before giving up
pub const RETRY_COUNT: u32 = 2;

/// Longest single readiness wait between cancellation checks
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Receive algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RxStrategy {
    /// One wait, one read of the whole frame; a short read fails
    SingleShot,
    /// One wait and one single-byte read per byte
    ByteAtATime,
    /// Keep reading until the frame is complete
    #[default]
    Reassemble,
}

impl TryFrom<u8> for RxStrategy {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RxStrategy::SingleShot),
            1 => Ok(RxStrategy::ByteAtATime),
            2 => Ok(RxStrategy::Reassemble),
            other => Err(format!("unknown receive strategy {} (expected 0, 1 or 2)", other)),
        }
    }
}

impl From<RxStrategy> for u8 {
    fn from(strategy: RxStrategy) -> Self {
        match strategy {
            RxStrategy::SingleShot => 0,
            RxStrategy::ByteAtATime => 1,
            RxStrategy::Reassemble => 2,
        }
    }
}

/// Everything a strategy needs to receive one frame
pub struct FrameReceive<'a> {
    pub test_name: &'a str,
    pub rx_device: &'a str,
    pub tx_device: &'a str,
    pub port: &'a dyn Transport,
    pub expected: &'a [u8],
    pub actual: &'a mut [u8],
    pub entry: &'a BaudEntry,
    pub slot: usize,
    pub deadline: Duration,
    pub reporter: &'a dyn Reporter,
    pub cancel: &'a CancelToken,
}

impl FrameReceive<'_> {
    fn fail(&self, outcome: Outcome) -> Outcome {
        self.entry.record_rx(false);
        self.reporter.report(outcome, None)
    }

    fn timed_out(&self) -> Outcome {
        log::warn!(
            "{} timed out reading from {}, sz {}, baud {}",
            self.test_name,
            self.rx_device,
            self.expected.len(),
            self.entry.rate()
        );
        self.fail(Outcome::RxTimeout)
    }

    fn read_error(&self, err: &io::Error) -> Outcome {
        log::warn!(
            "{} cannot read from {}: {}, sz {}, baud {}",
            self.test_name,
            self.rx_device,
            err,
            self.expected.len(),
            self.entry.rate()
        );
        self.fail(Outcome::RxError)
    }

    fn short_read(&self, got: usize, wanted: usize) -> Outcome {
        log::warn!(
            "{} {} returned read byte count {}, expected {}, baud {}",
            self.test_name,
            self.rx_device,
            got,
            wanted,
            self.entry.rate()
        );
        self.fail(Outcome::RxFail)
    }

    /// Shutdown while waiting: nothing is counted against the baud entry
    fn cancelled(&self) -> Outcome {
        log::debug!("{} receive on {} cancelled", self.test_name, self.rx_device);
        Outcome::Interrupt
    }

    /// Frame fully read: stamp the end time and check the payload
    fn verify(&self) -> Outcome {
        self.entry.mark_end(self.slot, Instant::now());
        let len = self.expected.len();

        if self.actual[..len] == *self.expected {
            self.entry.record_rx(true);
            return self.reporter.report(Outcome::Pass, None);
        }

        log::warn!(
            "{} test failed for {} rx, {} tx size {}, baud {}",
            self.test_name,
            self.rx_device,
            self.tx_device,
            len,
            self.entry.rate()
        );
        log::warn!("expected buffer:{}", hex_dump(self.expected));
        log::warn!("actual buffer:{}", hex_dump(&self.actual[..len]));
        self.fail(Outcome::RxFail)
    }
}

enum Step {
    Data(usize),
    Timeout,
    Failed(io::Error),
    Cancelled,
}

/// Wait up to `deadline` for input, in slices so cancellation is noticed
fn wait_input(port: &dyn Transport, deadline: Duration, cancel: &CancelToken) -> Result<bool, Step> {
    let start = Instant::now();
    loop {
        let remaining = deadline.saturating_sub(start.elapsed());
        match port.wait_readable(remaining.min(WAIT_SLICE)) {
            Ok(true) => return Ok(true),
            Ok(false) if remaining <= WAIT_SLICE => return Ok(false),
            Ok(false) => {}
            Err(e) => return Err(Step::Failed(e)),
        }
        if cancel.is_cancelled() {
            return Err(Step::Cancelled);
        }
    }
}

/// Wait for input then read into `buf`, retrying transient "would block"
/// results up to [`RETRY_COUNT`] times
fn timed_read(port: &dyn Transport, buf: &mut [u8], deadline: Duration, cancel: &CancelToken) -> Step {
    let mut retries = 0;
    loop {
        let attempt = match wait_input(port, deadline, cancel) {
            Ok(false) => return Step::Timeout,
            Ok(true) => port.read(buf),
            Err(step) => return step,
        };
        match attempt {
            Ok(n) => return Step::Data(n),
            Err(e) if is_transient(&e) && retries < RETRY_COUNT => {
                retries += 1;
                log::trace!("{}: nothing to read, retry {}", port.device(), retries);
            }
            Err(e) => return Step::Failed(e),
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Receive one frame with `strategy`
pub fn receive_frame(strategy: RxStrategy, frame: FrameReceive<'_>) -> Outcome {
    match strategy {
        RxStrategy::SingleShot => single_shot(frame),
        RxStrategy::ByteAtATime => byte_at_a_time(frame),
        RxStrategy::Reassemble => reassemble(frame),
    }
}

fn single_shot(mut frame: FrameReceive<'_>) -> Outcome {
    let len = frame.expected.len();
    match timed_read(frame.port, &mut frame.actual[..len], frame.deadline, frame.cancel) {
        Step::Timeout => frame.timed_out(),
        Step::Failed(e) => frame.read_error(&e),
        Step::Cancelled => frame.cancelled(),
        Step::Data(n) if n != len => frame.short_read(n, len),
        Step::Data(_) => frame.verify(),
    }
}

fn byte_at_a_time(mut frame: FrameReceive<'_>) -> Outcome {
    let len = frame.expected.len();
    for i in 0..len {
        match timed_read(frame.port, &mut frame.actual[i..i + 1], frame.deadline, frame.cancel) {
            Step::Timeout => return frame.timed_out(),
            Step::Failed(e) => return frame.read_error(&e),
            Step::Cancelled => return frame.cancelled(),
            Step::Data(1) => {}
            Step::Data(n) => return frame.short_read(n, 1),
        }
    }
    frame.verify()
}

fn reassemble(mut frame: FrameReceive<'_>) -> Outcome {
    let len = frame.expected.len();
    let mut filled = 0;
    let mut stalls = 0;

    while filled < len {
        match timed_read(frame.port, &mut frame.actual[filled..len], frame.deadline, frame.cancel) {
            Step::Timeout => return frame.timed_out(),
            Step::Failed(e) => return frame.read_error(&e),
            Step::Cancelled => return frame.cancelled(),
            Step::Data(0) => {
                stalls += 1;
                if stalls > RETRY_COUNT {
                    return frame.short_read(filled, len);
                }
            }
            Step::Data(n) => {
                if n < len - filled {
                    log::trace!(
                        "{}: fragment of {} bytes, {} of {} received",
                        frame.rx_device,
                        n,
                        filled + n,
                        len
                    );
                }
                filled += n;
                stalls = 0;
            }
        }
    }
    frame.verify()
}

/// Hex dump, 32 bytes per line with an offset prefix
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in bytes.chunks(32).enumerate() {
        let _ = write!(out, "\n{:08x}:", line * 32);
        for (i, byte) in chunk.iter().enumerate() {
            if i % 16 == 0 {
                out.push(' ');
            }
            let _ = write!(out, "{:02x}", byte);
        }
    }
    out
}
