//! Test outcome tokens and the counting results reporter.
//!
//! Every transfer reports exactly one [`Outcome`]. The reporter counts the
//! tokens and, on [`Outcome::Complete`], writes the final verdict block.
//! `report` always hands back the token it was given so call sites can write
//! `return reporter.report(Outcome::RxFail, None)`.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Result token for a transfer, a thread operation or the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Start,
    Complete,
    Pass,
    Fail,
    Error,
    TxTimeout,
    TxError,
    TxFail,
    RxError,
    RxTimeout,
    RxFail,
    Interrupt,
}

impl Outcome {
    pub fn is_pass(self) -> bool {
        self == Outcome::Pass
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Outcome::Start => "start",
            Outcome::Complete => "complete",
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
            Outcome::Error => "error",
            Outcome::TxTimeout => "tx-timeout",
            Outcome::TxError => "tx-error",
            Outcome::TxFail => "tx-fail",
            Outcome::RxError => "rx-error",
            Outcome::RxTimeout => "rx-timeout",
            Outcome::RxFail => "rx-fail",
            Outcome::Interrupt => "interrupt",
        };
        f.write_str(name)
    }
}

/// Sink for outcome tokens, shared by every worker thread
pub trait Reporter: Send + Sync {
    /// Record `outcome` and return it unchanged
    fn report(&self, outcome: Outcome, descr: Option<&str>) -> Outcome;
}

/// Final verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
    DidNotRun,
}

impl Verdict {
    pub fn is_success(self) -> bool {
        self == Verdict::Passed
    }
}

/// Snapshot of the reporter counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub start: u32,
    pub complete: u32,
    pub pass: u32,
    pub fail: u32,
    pub error: u32,
    pub tx_error: u32,
    pub tx_fail: u32,
    pub rx_error: u32,
    pub rx_timeout: u32,
    pub rx_fail: u32,
    pub interrupt: u32,
}

impl Tally {
    pub fn failures(&self) -> u32 {
        self.fail + self.error + self.tx_error + self.tx_fail + self.rx_error + self.rx_timeout
            + self.rx_fail
    }

    pub fn verdict(&self) -> Verdict {
        if self.failures() != 0 {
            Verdict::Failed
        } else if self.pass != 0 {
            Verdict::Passed
        } else {
            Verdict::DidNotRun
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    start: AtomicU32,
    complete: AtomicU32,
    pass: AtomicU32,
    fail: AtomicU32,
    error: AtomicU32,
    tx_error: AtomicU32,
    tx_fail: AtomicU32,
    rx_error: AtomicU32,
    rx_timeout: AtomicU32,
    rx_fail: AtomicU32,
    interrupt: AtomicU32,
}

/// Counting reporter that logs the verdict block on completion
#[derive(Debug)]
pub struct FitResults {
    test_name: String,
    counters: Counters,
    verdict: Mutex<Option<Verdict>>,
}

impl FitResults {
    pub fn new(test_name: &str) -> Self {
        Self {
            test_name: test_name.to_uppercase(),
            counters: Counters::default(),
            verdict: Mutex::new(None),
        }
    }

    pub fn tally(&self) -> Tally {
        let c = &self.counters;
        Tally {
            start: c.start.load(Ordering::Relaxed),
            complete: c.complete.load(Ordering::Relaxed),
            pass: c.pass.load(Ordering::Relaxed),
            fail: c.fail.load(Ordering::Relaxed),
            error: c.error.load(Ordering::Relaxed),
            tx_error: c.tx_error.load(Ordering::Relaxed),
            tx_fail: c.tx_fail.load(Ordering::Relaxed),
            rx_error: c.rx_error.load(Ordering::Relaxed),
            rx_timeout: c.rx_timeout.load(Ordering::Relaxed),
            rx_fail: c.rx_fail.load(Ordering::Relaxed),
            interrupt: c.interrupt.load(Ordering::Relaxed),
        }
    }

    /// Verdict recorded by the last [`Outcome::Complete`], if any
    pub fn verdict(&self) -> Option<Verdict> {
        *self.verdict.lock()
    }

    /// Render the verdict block for the current counters
    pub fn verdict_text(&self, descr: Option<&str>) -> (Verdict, String) {
        let tally = self.tally();
        let verdict = tally.verdict();
        let mut text = match (verdict, descr) {
            (Verdict::Failed, Some(d)) if !d.is_empty() => {
                format!("{} TEST HAS FAILED FOR {}\n", self.test_name, d)
            }
            (Verdict::Failed, _) => format!("{} TEST HAS FAILED\n", self.test_name),
            (Verdict::Passed, _) => format!("{} TEST HAS PASSED\n", self.test_name),
            (Verdict::DidNotRun, _) => format!("{} TEST DID NOT RUN CORRECTLY\n", self.test_name),
        };

        for (name, count) in [
            ("Pass", tally.pass),
            ("Fail", tally.fail),
            ("Error", tally.error),
            ("TxError", tally.tx_error),
            ("TxFail", tally.tx_fail),
            ("RxError", tally.rx_error),
            ("RxTimeout", tally.rx_timeout),
            ("RxFail", tally.rx_fail),
        ] {
            if count != 0 {
                text.push_str(&format!("{:25}{:<9} {:04}\n", "", name, count));
            }
        }
        if tally.interrupt != 0 {
            text.push_str(&format!("{:25}Test Interrupted\n", ""));
        }
        (verdict, text)
    }

    fn complete(&self, descr: Option<&str>) {
        self.counters.complete.fetch_add(1, Ordering::Relaxed);
        let (verdict, text) = self.verdict_text(descr);
        for line in text.lines() {
            if verdict.is_success() {
                log::info!("{}", line);
            } else {
                log::error!("{}", line);
            }
        }
        *self.verdict.lock() = Some(verdict);
    }
}

impl Reporter for FitResults {
    fn report(&self, outcome: Outcome, descr: Option<&str>) -> Outcome {
        let c = &self.counters;
        let counter = match outcome {
            Outcome::Start => {
                log::info!("STARTING {} TEST", self.test_name);
                &c.start
            }
            Outcome::Complete => {
                self.complete(descr);
                return outcome;
            }
            Outcome::Pass => &c.pass,
            Outcome::Fail => &c.fail,
            Outcome::Error => &c.error,
            Outcome::TxError => &c.tx_error,
            Outcome::TxTimeout | Outcome::TxFail => &c.tx_fail,
            Outcome::RxError => &c.rx_error,
            Outcome::RxTimeout => &c.rx_timeout,
            Outcome::RxFail => &c.rx_fail,
            Outcome::Interrupt => &c.interrupt,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }
}
