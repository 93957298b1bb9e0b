//! Test engine: worker threads, monitor loop and the run facade
//!
//! [`SerialFit`] owns a scheduled [`Registry`] and a device [`Connector`].
//! `run` starts a reader and a writer thread per scheduled port pair, drives
//! monitor cycles until the iteration count is reached or the interrupt flag
//! drops, then prints statistics and reports the verdict.

mod coordinator;
mod lifecycle;
mod monitor;
mod receive;
mod stats;

pub use coordinator::{ATC_TEST_STRING, Coordinator};
pub use lifecycle::PairThreads;
pub use monitor::{Monitor, MonitorPolicy, WaitPolicy};
pub use receive::{FrameReceive, RETRY_COUNT, RxStrategy, hex_dump, receive_frame};
pub use stats::{SUMMARY_CAP, failure_summary, log_statistics, statistics_block};

use crate::error::Error;
use crate::matrix::Registry;
use crate::results::{FitResults, Outcome, Reporter, Verdict};
use crate::transport::{Connector, DeviceTable};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Name the verdict lines are printed under
pub const TEST_NAME: &str = "serial";

/// Run-wide knobs shared by every worker thread
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Hardware flow control on async lines
    pub flow_control: bool,
    /// Only exercise this baud rate
    pub baud_override: Option<u32>,
    pub strategy: RxStrategy,
    /// Scales the wire time of a frame into the receive deadline
    pub timeout_multiplier: u32,
    /// End a pair's sweep at its first failed frame
    pub quick_fail: bool,
    /// Overlay [`ATC_TEST_STRING`] on the start of each frame
    pub atc_test_string: bool,
    /// Monitor cycles to run, 0 runs until interrupted
    pub iterations: u32,
    pub wait: WaitPolicy,
    /// Poll period of a reader waiting for its writer to come back
    pub writer_poll: Duration,
    /// Polls before the writer is declared timed out
    pub writer_poll_limit: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            flow_control: false,
            baud_override: None,
            strategy: RxStrategy::default(),
            timeout_multiplier: 1000,
            quick_fail: false,
            atc_test_string: false,
            iterations: 1,
            wait: WaitPolicy::Block,
            writer_poll: Duration::from_millis(10),
            writer_poll_limit: 500,
        }
    }
}

/// What a finished run hands back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub verdict: Verdict,
    /// `tx->rx@rate, ` entries for every failing rate
    pub summary: String,
    pub interrupted: bool,
    /// Monitor cycles completed
    pub cycles: u32,
}

/// The serial loopback test
pub struct SerialFit {
    registry: Arc<Registry>,
    devices: Arc<DeviceTable>,
    results: Arc<FitResults>,
    options: RunOptions,
}

impl SerialFit {
    pub fn new(registry: Registry, connector: Arc<dyn Connector>, options: RunOptions) -> Self {
        Self {
            registry: Arc::new(registry),
            devices: Arc::new(DeviceTable::new(connector)),
            results: Arc::new(FitResults::new(TEST_NAME)),
            options,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn results(&self) -> &FitResults {
        &self.results
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run the scheduled pairs. `keep_going` is cleared by the interrupt
    /// handler to stop the run early.
    pub fn run(&self, keep_going: &Arc<AtomicBool>) -> RunReport {
        let reporter: Arc<dyn Reporter> = self.results.clone();
        reporter.report(Outcome::Start, None);

        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.devices),
            Arc::clone(&reporter),
            self.options.clone(),
        ));

        let mut monitor = Monitor::new(Arc::clone(&coordinator), Arc::clone(keep_going));
        let cycles = if monitor.start() == 0 {
            log::warn!("no port pairs scheduled");
            0
        } else {
            monitor.run(self.options.iterations)
        };
        let interrupted = !keep_going.load(std::sync::atomic::Ordering::Relaxed);

        log_statistics(&self.registry, self.options.atc_test_string);
        monitor.stop();
        log::debug!("{} devices were opened", self.devices.len());

        let summary = failure_summary(&self.registry);
        if interrupted {
            reporter.report(Outcome::Interrupt, None);
        }
        reporter.report(Outcome::Complete, Some(&summary));

        let verdict = self.results.verdict().unwrap_or(Verdict::DidNotRun);
        RunReport {
            verdict,
            summary,
            interrupted,
            cycles,
        }
    }

    /// Report a run that failed before any pair was started. The error is
    /// counted, so the verdict block still goes out and reads failed.
    pub fn setup_failed(error: &Error) -> RunReport {
        log::error!("{}", error);
        let results = FitResults::new(TEST_NAME);
        results.report(Outcome::Start, None);
        results.report(Outcome::Error, None);
        results.report(Outcome::Complete, None);

        RunReport {
            verdict: results.verdict().unwrap_or(Verdict::Failed),
            summary: String::new(),
            interrupted: false,
            cycles: 0,
        }
    }
}
