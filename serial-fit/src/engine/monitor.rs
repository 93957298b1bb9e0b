//! Monitor loop: releases every scheduled reader once per cycle and waits
//! for each of them according to the [`WaitPolicy`]

use super::coordinator::Coordinator;
use super::lifecycle::PairThreads;
use super::stats::log_statistics;
use crate::core::types::LinkState;
use crate::results::Outcome;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// How often a blocked wait re-checks the interrupt flag
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// Monitor behaviour as named in settings and on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MonitorPolicy {
    /// Wait for every reader to finish its cycle
    #[default]
    Block,
    /// Poll and print statistics periodically while waiting
    Scroll,
    /// Give up on readers that are not making progress
    Unblock,
}

/// How the monitor waits for one reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    Block,
    Scroll { poll: Duration, stats_every: u32 },
    Unblock { timeout: Duration },
}

impl From<MonitorPolicy> for WaitPolicy {
    fn from(policy: MonitorPolicy) -> Self {
        match policy {
            MonitorPolicy::Block => WaitPolicy::Block,
            MonitorPolicy::Scroll => WaitPolicy::Scroll {
                poll: Duration::from_millis(10),
                stats_every: 1000,
            },
            MonitorPolicy::Unblock => WaitPolicy::Unblock {
                timeout: Duration::from_secs(2),
            },
        }
    }
}

/// Drives the worker threads of all scheduled port pairs
pub struct Monitor {
    coordinator: Arc<Coordinator>,
    keep_going: Arc<AtomicBool>,
    threads: Vec<PairThreads>,
    scroll_waits: u32,
}

impl Monitor {
    pub fn new(coordinator: Arc<Coordinator>, keep_going: Arc<AtomicBool>) -> Self {
        Self {
            coordinator,
            keep_going,
            threads: Vec::new(),
            scroll_waits: 1,
        }
    }

    fn running(&self) -> bool {
        self.keep_going.load(Ordering::Relaxed)
    }

    /// Start reader and writer threads for every scheduled port pair.
    /// Returns how many pairs are running.
    pub fn start(&mut self) -> usize {
        let ids: Vec<usize> = self
            .coordinator
            .registry()
            .scheduled()
            .map(|p| p.id())
            .collect();
        self.start_pairs(&ids)
    }

    /// A pair whose threads cannot start is counted as an error and left
    /// out; the others still run
    pub(crate) fn start_pairs(&mut self, ids: &[usize]) -> usize {
        for &id in ids {
            match PairThreads::start(&self.coordinator, id) {
                Ok(threads) => self.threads.push(threads),
                Err(e) => {
                    log::warn!("{}, pair not run", e);
                    self.coordinator.reporter().report(Outcome::Error, None);
                }
            }
        }

        log::info!("{} port pairs started", self.threads.len());
        self.threads.len()
    }

    /// One monitor cycle: release all readers, then wait for each
    pub fn run_cycle(&mut self) {
        let registry = Arc::clone(self.coordinator.registry());

        for threads in &self.threads {
            if let Some(pair) = registry.get(threads.id()) {
                if let Some(cable) = registry.cable(pair) {
                    cable.begin_sweep(pair.id());
                }
            }
        }
        for threads in &self.threads {
            threads.signals().reader.post();
        }

        let policy = self.coordinator.options().wait;
        for index in 0..self.threads.len() {
            self.wait_for(index, policy);
        }
    }

    fn wait_for(&mut self, index: usize, policy: WaitPolicy) {
        let registry = Arc::clone(self.coordinator.registry());
        let threads = &self.threads[index];
        let signals = Arc::clone(threads.signals());
        let Some(pair) = registry.get(threads.id()) else {
            return;
        };

        match policy {
            WaitPolicy::Block => {
                while !signals.monitor.wait_timeout(INTERRUPT_POLL) {
                    if !self.running() {
                        return;
                    }
                }
            }
            WaitPolicy::Scroll { poll, stats_every } => {
                while !signals.monitor.try_wait() {
                    if !self.running() {
                        return;
                    }
                    thread::sleep(poll);
                    if self.scroll_waits % stats_every.max(1) == 0 {
                        log_statistics(&registry, self.coordinator.options().atc_test_string);
                        self.scroll_waits = 1;
                    }
                    self.scroll_waits += 1;
                }
            }
            WaitPolicy::Unblock { timeout } => {
                let mut last_progress = pair.progress();
                while !signals.monitor.wait_timeout(timeout) {
                    if !self.running() {
                        return;
                    }
                    if pair.reader_state() == LinkState::WaitingForMonitor {
                        log::debug!("monitor found reader {} blocked", pair.rx_device());
                        return;
                    }
                    let progress = pair.progress();
                    if progress == last_progress {
                        log::warn!("monitor found reader {} stuck, moving on", pair.rx_device());
                        return;
                    }
                    last_progress = progress;
                }
            }
        }
    }

    /// Run cycles until `iterations` are done (0 = until interrupted).
    /// Returns the number of completed cycles.
    pub fn run(&mut self, iterations: u32) -> u32 {
        let mut cycles = 0;
        loop {
            self.run_cycle();
            if !self.running() {
                break;
            }
            cycles += 1;
            if iterations != 0 && cycles >= iterations {
                break;
            }
        }
        cycles
    }

    /// Cancel and join every worker thread, freeing per-run resources
    pub fn stop(&mut self) {
        let registry = Arc::clone(self.coordinator.registry());
        for mut threads in self.threads.drain(..) {
            match registry.get(threads.id()) {
                Some(pair) => threads.release(pair),
                None => {
                    threads.cancel();
                }
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::coordinator::tests::coordinator;

    #[test]
    fn test_policy_parameters() {
        assert_eq!(WaitPolicy::from(MonitorPolicy::Block), WaitPolicy::Block);
        assert_eq!(
            WaitPolicy::from(MonitorPolicy::Scroll),
            WaitPolicy::Scroll {
                poll: Duration::from_millis(10),
                stats_every: 1000
            }
        );
        assert_eq!(
            WaitPolicy::from(MonitorPolicy::Unblock),
            WaitPolicy::Unblock {
                timeout: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn test_policy_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            monitor: MonitorPolicy,
        }
        let w: Wrapper = toml::from_str("monitor = \"unblock\"").unwrap();
        assert_eq!(w.monitor, MonitorPolicy::Unblock);
        assert_eq!(MonitorPolicy::default(), MonitorPolicy::Block);
    }

    #[test]
    fn test_failed_pair_start_does_not_stop_others() {
        let (coordinator, results) = coordinator("sp1 sp1 1 1 1\n");
        let id = coordinator
            .registry()
            .find("sp1", "sp1")
            .map(|p| p.id())
            .unwrap();

        let mut monitor = Monitor::new(coordinator, Arc::new(AtomicBool::new(true)));
        assert_eq!(monitor.start_pairs(&[usize::MAX, id]), 1);
        assert_eq!(monitor.threads[0].id(), id);
        assert_eq!(results.tally().error, 1);

        monitor.stop();
        assert!(monitor.threads.is_empty());
    }
}
