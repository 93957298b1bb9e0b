//! Loopback test matrix
//!
//! The [`Registry`] holds every port pair the board can be wired for. It is
//! built once, scheduled from the schedule file, then shared read-only (behind
//! an `Arc`) by the monitor and all worker threads.

mod cable;
mod descriptor;
mod rules;

pub use cable::{Arrival, Cable};
pub use descriptor::{MAX_TRANSFER, Plan, PortHandles, PortPair};
pub use rules::SyncBaudRule;

use crate::baud::{ASYNC_RATES, SYNC_HIGH_RATES, SYNC_RATES};
use crate::core::types::Protocol;
use crate::schedule::ScheduleLine;
use std::collections::HashMap;

pub const ASYNC_TEST: &str = "AsyncExtLoopback";
pub const SYNC_TEST: &str = "SyncExtLoopback";

const ASYNC_SELF_LOOPS: &[&str] = &["sp1", "sp2", "sp3", "sp4", "sp6", "sp8"];
const SYNC_SELF_LOOPS: &[&str] = &["sp1s", "sp2s", "sp3s", "sp5s", "sp8s"];
const ASYNC_CABLED: &[&str] = &["sp1", "sp2", "sp3", "sp8"];
const SYNC_CABLED: &[&str] = &["sp1s", "sp2s", "sp3s", "sp5s", "sp8s"];

/// Every device name the matrix knows about
pub fn known_devices() -> Vec<&'static str> {
    let mut devices: Vec<&str> = ASYNC_SELF_LOOPS
        .iter()
        .chain(SYNC_SELF_LOOPS)
        .chain(ASYNC_CABLED)
        .chain(SYNC_CABLED)
        .copied()
        .collect();
    devices.sort_unstable();
    devices.dedup();
    devices
}

/// Rate table swept by a pair receiving on `device`
pub fn rates_for(device: &str) -> &'static [u32] {
    match device {
        "sp3s" | "sp5s" => SYNC_HIGH_RATES,
        d if d.ends_with('s') => SYNC_RATES,
        _ => ASYNC_RATES,
    }
}

/// All port pairs plus the cable handshakes between opposite directions
#[derive(Debug)]
pub struct Registry {
    pairs: Vec<PortPair>,
    index: HashMap<(String, String), usize>,
    cables: HashMap<usize, usize>,
    cable_locks: Vec<Cable>,
    sync_rule: SyncBaudRule,
}

impl Registry {
    /// Build a registry from an explicit list of port pairs
    pub fn from_pairs(pairs: Vec<PortPair>, sync_rule: SyncBaudRule) -> Self {
        let mut pairs = pairs;
        let mut index = HashMap::new();
        for (id, pair) in pairs.iter_mut().enumerate() {
            pair.set_id(id);
            let key = (pair.rx_device().to_string(), pair.tx_device().to_string());
            if index.insert(key, id).is_some() {
                log::warn!("duplicate port pair {}, first entry shadowed", pair.label());
            }
        }

        let mut cables = HashMap::new();
        let mut cable_locks = Vec::new();
        for pair in &pairs {
            if pair.is_self_loop() || cables.contains_key(&pair.id()) {
                continue;
            }
            let reverse = (pair.tx_device().to_string(), pair.rx_device().to_string());
            if let Some(&peer) = index.get(&reverse) {
                let slot = cable_locks.len();
                cable_locks.push(Cable::new(pair.id(), peer));
                cables.insert(pair.id(), slot);
                cables.insert(peer, slot);
            }
        }

        let registry = Self {
            pairs,
            index,
            cables,
            cable_locks,
            sync_rule,
        };
        registry.check_sync_rule();
        registry
    }

    /// The full board wiring: every self-loop and every cross-connect in
    /// both directions
    pub fn standard(sync_rule: SyncBaudRule) -> Self {
        let mut pairs = Vec::new();

        for dev in ASYNC_SELF_LOOPS {
            pairs.push(PortPair::new(ASYNC_TEST, dev, dev, Protocol::Async, rates_for(dev)));
        }
        for dev in SYNC_SELF_LOOPS {
            pairs.push(PortPair::new(SYNC_TEST, dev, dev, Protocol::Sync, rates_for(dev)));
        }
        for (name, protocol, ports) in [
            (ASYNC_TEST, Protocol::Async, ASYNC_CABLED),
            (SYNC_TEST, Protocol::Sync, SYNC_CABLED),
        ] {
            for (i, a) in ports.iter().enumerate() {
                for b in &ports[i + 1..] {
                    pairs.push(PortPair::new(name, a, b, protocol, rates_for(a)));
                    pairs.push(PortPair::new(name, b, a, protocol, rates_for(b)));
                }
            }
        }

        Self::from_pairs(pairs, sync_rule)
    }

    fn check_sync_rule(&self) {
        let known: Vec<&str> = self
            .pairs
            .iter()
            .filter(|p| p.protocol() == Protocol::Sync)
            .map(|p| p.rx_device())
            .collect();
        for port in self.sync_rule.unknown_ports(&known) {
            log::warn!("sync baud rule names {} which is not a wired sync port", port);
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[PortPair] {
        &self.pairs
    }

    pub fn get(&self, id: usize) -> Option<&PortPair> {
        self.pairs.get(id)
    }

    pub fn find(&self, rx: &str, tx: &str) -> Option<&PortPair> {
        self.index
            .get(&(rx.to_string(), tx.to_string()))
            .map(|&id| &self.pairs[id])
    }

    pub fn scheduled(&self) -> impl Iterator<Item = &PortPair> {
        self.pairs.iter().filter(|p| p.is_scheduled())
    }

    pub fn sync_rule(&self) -> &SyncBaudRule {
        &self.sync_rule
    }

    /// Reverse-direction pair over the same two ports, if it is scheduled
    pub fn concurrent_of(&self, pair: &PortPair) -> Option<&PortPair> {
        let cable = self.cable(pair)?;
        let peer = self.get(cable.peer_of(pair.id()))?;
        peer.is_scheduled().then_some(peer)
    }

    /// Handshake shared with the reverse direction of `pair`'s cable
    pub fn cable(&self, pair: &PortPair) -> Option<&Cable> {
        self.cables
            .get(&pair.id())
            .map(|&slot| &self.cable_locks[slot])
    }

    /// Schedule the pair named by each line. Returns the number of lines
    /// that matched a pair.
    pub fn apply_schedule(&mut self, lines: &[ScheduleLine]) -> usize {
        let mut matched = 0;
        for line in lines {
            let key = (line.rx_device.clone(), line.tx_device.clone());
            let Some(&id) = self.index.get(&key) else {
                log::debug!(
                    "schedule: no port pair {} rx / {} tx, ignored",
                    line.rx_device,
                    line.tx_device
                );
                continue;
            };

            let plan = Plan {
                min_frame: clamp_frame(line.min_frame, "minimum"),
                max_frame: clamp_frame(line.max_frame, "maximum"),
                iterations: line.iterations,
            };
            if plan.min_frame > plan.max_frame {
                log::warn!(
                    "schedule: {} minimum frame {} above maximum {}, no frames will be sent",
                    self.pairs[id].label(),
                    plan.min_frame,
                    plan.max_frame
                );
            }
            self.pairs[id].schedule(plan);
            matched += 1;
        }
        matched
    }
}

fn clamp_frame(size: usize, which: &str) -> usize {
    let clamped = size.clamp(1, MAX_TRANSFER);
    if clamped != size {
        log::error!(
            "warning: request for {} frame size {} out of range, using {} bytes",
            which,
            size,
            clamped
        );
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::LinkState;
    use crate::schedule::parse_schedule;

    #[test]
    fn test_standard_matrix() {
        let registry = Registry::standard(SyncBaudRule::default());
        assert_eq!(registry.len(), 43);
        assert_eq!(registry.scheduled().count(), 0);

        let self_loops = registry.pairs().iter().filter(|p| p.is_self_loop()).count();
        assert_eq!(self_loops, 11);

        let sync = registry
            .pairs()
            .iter()
            .filter(|p| p.protocol() == Protocol::Sync)
            .count();
        assert_eq!(sync, 25);

        let sp3s = registry.find("sp3s", "sp1s").unwrap();
        assert_eq!(sp3s.rates().len(), 2);
        assert_eq!(sp3s.test_name(), SYNC_TEST);
        assert!(registry.find("sp4", "sp1").is_none());
    }

    #[test]
    fn test_every_cross_connect_has_a_cable() {
        let registry = Registry::standard(SyncBaudRule::default());
        for pair in registry.pairs() {
            match registry.cable(pair) {
                Some(cable) => {
                    assert!(!pair.is_self_loop());
                    let peer = registry.get(cable.peer_of(pair.id())).unwrap();
                    assert_eq!(peer.rx_device(), pair.tx_device());
                    assert_eq!(peer.tx_device(), pair.rx_device());
                }
                None => assert!(pair.is_self_loop()),
            }
        }
    }

    #[test]
    fn test_schedule_single_line() {
        let mut registry = Registry::standard(SyncBaudRule::default());
        let matched = registry.apply_schedule(&parse_schedule("sp2 sp1 1 32 10\n"));
        assert_eq!(matched, 1);

        let scheduled: Vec<_> = registry.scheduled().collect();
        assert_eq!(scheduled.len(), 1);
        let pair = scheduled[0];
        assert_eq!(pair.rx_device(), "sp2");
        assert_eq!(pair.tx_device(), "sp1");
        assert_eq!(pair.reader_state(), LinkState::Scheduled);
        assert_eq!(pair.writer_state(), LinkState::Scheduled);
        assert_eq!(
            pair.plan(),
            Plan {
                min_frame: 1,
                max_frame: 32,
                iterations: 10
            }
        );

        // The reverse direction is not scheduled, so there is no concurrent test
        assert!(registry.concurrent_of(pair).is_none());
        assert_eq!(
            registry.find("sp1", "sp2").unwrap().reader_state(),
            LinkState::Unscheduled
        );
    }

    #[test]
    fn test_schedule_clamps_and_ignores_unknown() {
        let mut registry = Registry::standard(SyncBaudRule::default());
        let matched = registry.apply_schedule(&parse_schedule(
            "sp1 sp1 0 5000 1\nsp9 sp9 1 1 1\nsp2s sp3s 4 8 2\nsp3s sp2s 4 8 2\n",
        ));
        assert_eq!(matched, 3);

        let plan = registry.find("sp1", "sp1").unwrap().plan();
        assert_eq!(plan.min_frame, 1);
        assert_eq!(plan.max_frame, MAX_TRANSFER);

        let forward = registry.find("sp2s", "sp3s").unwrap();
        let reverse = registry.concurrent_of(forward).unwrap();
        assert_eq!(reverse.rx_device(), "sp3s");
    }

    #[test]
    fn test_rates_for() {
        assert_eq!(rates_for("sp4"), ASYNC_RATES);
        assert_eq!(rates_for("sp8s"), SYNC_RATES);
        assert_eq!(rates_for("sp5s"), SYNC_HIGH_RATES);
    }
}
