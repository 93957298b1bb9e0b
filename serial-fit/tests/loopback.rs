//! Loopback Engine Tests
//!
//! Whole-engine runs over the in-memory loopback harness, no hardware needed:
//! - Counters and verdicts for clean and failing runs
//! - Device sharing between pairs and self-loops
//! - One line configuration per port per baud transition across a cable
//! - Receive strategies against fragmented delivery
//! - Baud override, sync baud rule and quick fail
//! - Short writes, stalled writers and one-way cables
//!
//! Run with: `cargo test --test loopback`

use serial_fit::engine::{RxStrategy, WaitPolicy, statistics_block};
use serial_fit::matrix::{Registry, SyncBaudRule};
use serial_fit::results::Tally;
use serial_fit::schedule::{load_schedule, parse_schedule};
use serial_fit::transport::{LoopbackHarness, MockOptions};
use serial_fit::{RunOptions, RunReport, SerialFit, Verdict};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn registry(schedule: &str) -> Registry {
    let mut registry = Registry::standard(SyncBaudRule::default());
    registry.apply_schedule(&parse_schedule(schedule));
    registry
}

/// Harness with a route from each scheduled pair's tx port to its rx port
fn wired(registry: &Registry, options: MockOptions) -> LoopbackHarness {
    let harness = LoopbackHarness::new(options);
    for pair in registry.scheduled() {
        harness.route(pair.tx_device(), pair.rx_device());
    }
    harness
}

fn fast_options() -> RunOptions {
    RunOptions {
        writer_poll: Duration::from_millis(1),
        writer_poll_limit: 2000,
        ..RunOptions::default()
    }
}

fn run(fit: &SerialFit) -> RunReport {
    let keep_going = Arc::new(AtomicBool::new(true));
    fit.run(&keep_going)
}

fn tally(fit: &SerialFit) -> Tally {
    fit.results().tally()
}

// ============================================================================
// Clean runs
// ============================================================================

#[test]
fn test_self_loop_sweeps_every_rate() {
    let registry = registry("sp1 sp1 4 4 1\n");
    let harness = wired(&registry, MockOptions::default());
    let fit = SerialFit::new(registry, Arc::new(harness.clone()), fast_options());

    let report = run(&fit);
    assert_eq!(report.verdict, Verdict::Passed);
    assert_eq!(report.cycles, 1);
    assert!(report.summary.is_empty());
    assert!(!report.interrupted);

    let pair = fit.registry().find("sp1", "sp1").unwrap();
    for (rate, counts) in pair.rates().snapshot() {
        assert_eq!(counts.rx_ok, 1, "rx at {}", rate);
        assert_eq!(counts.tx_ok, 1, "tx at {}", rate);
        assert!(!counts.has_failures());
    }

    // 8 rates, one rx and one tx pass each
    let t = tally(&fit);
    assert_eq!(t.pass, 16);
    assert_eq!(t.failures(), 0);
    assert_eq!(t.start, 1);
    assert_eq!(t.complete, 1);

    // Shared handle, opened once, configured once per rate
    let handles = pair.handles().unwrap();
    assert!(handles.is_shared());
    assert_eq!(harness.open_count("sp1"), 1);
    assert_eq!(harness.configurations("sp1").len(), 8);
}

#[test]
fn test_runs_accumulate() {
    let registry = registry("sp1 sp1 1 1 1\n");
    let harness = wired(&registry, MockOptions::default());
    let options = RunOptions {
        baud_override: Some(9600),
        ..fast_options()
    };
    let fit = SerialFit::new(registry, Arc::new(harness.clone()), options);

    run(&fit);
    run(&fit);

    let pair = fit.registry().find("sp1", "sp1").unwrap();
    let counts = pair.rates().find(9600).unwrap().counts();
    assert_eq!(counts.rx_ok, 2);
    assert_eq!(counts.tx_ok, 2);
    assert_eq!(tally(&fit).pass, 4);
    assert_eq!(tally(&fit).start, 2);
    assert_eq!(harness.open_count("sp1"), 1);
}

#[test]
fn test_schedule_file_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schedule.txt");
    std::fs::write(
        &path,
        "# rx tx min max iterations\nsp2 sp1 1 3 2\nnot a schedule line\nsp9 sp1 1 1 1\n",
    )
    .unwrap();

    let mut registry = Registry::standard(SyncBaudRule::default());
    let lines = load_schedule(&path).unwrap();
    assert_eq!(registry.apply_schedule(&lines), 1);
    assert_eq!(registry.scheduled().count(), 1);

    let harness = wired(&registry, MockOptions::default());
    let fit = SerialFit::new(registry, Arc::new(harness), fast_options());
    let report = run(&fit);
    assert_eq!(report.verdict, Verdict::Passed);

    // Sizes 1..=3, twice over, at each rate
    let pair = fit.registry().find("sp2", "sp1").unwrap();
    assert_eq!(pair.label(), "sp1->sp2");
    for (_, counts) in pair.rates().snapshot() {
        assert_eq!(counts.rx_ok, 6);
    }
    assert_eq!(tally(&fit).pass, 8 * 6 * 2);
}

#[test]
fn test_atc_test_string_frames_pass() {
    let registry = registry("sp4 sp4 60 60 1\n");
    let harness = wired(&registry, MockOptions::default());
    let options = RunOptions {
        baud_override: Some(115200),
        atc_test_string: true,
        ..fast_options()
    };
    let fit = SerialFit::new(registry, Arc::new(harness), options);

    assert_eq!(run(&fit).verdict, Verdict::Passed);
    let block = statistics_block(fit.registry(), true);
    assert!(block.contains("ATC test string used for first 49 bytes"));
}

#[test]
fn test_scroll_policy_completes() {
    let registry = registry("sp6 sp6 2 2 1\n");
    let harness = wired(&registry, MockOptions::default());
    let options = RunOptions {
        baud_override: Some(38400),
        wait: WaitPolicy::Scroll {
            poll: Duration::from_millis(1),
            stats_every: 3,
        },
        iterations: 2,
        ..fast_options()
    };
    let fit = SerialFit::new(registry, Arc::new(harness), options);

    let report = run(&fit);
    assert_eq!(report.verdict, Verdict::Passed);
    assert_eq!(report.cycles, 2);
}

// ============================================================================
// Cables
// ============================================================================

#[test]
fn test_cable_configures_once_per_transition() {
    let registry = registry("sp1 sp2 2 2 1\nsp2 sp1 2 2 1\n");
    let harness = wired(&registry, MockOptions::default());
    let fit = SerialFit::new(registry, Arc::new(harness.clone()), fast_options());

    let report = run(&fit);
    assert_eq!(report.verdict, Verdict::Passed, "{}", report.summary);

    // Both pairs share the two devices
    assert_eq!(harness.open_count("sp1"), 1);
    assert_eq!(harness.open_count("sp2"), 1);

    // Exactly one reader configured both ports at each of the 8 rates
    for device in ["sp1", "sp2"] {
        let rates: Vec<u32> = harness
            .configurations(device)
            .iter()
            .map(|line| line.baud)
            .collect();
        assert_eq!(
            rates,
            vec![1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200],
            "{}",
            device
        );
    }

    // 2 pairs x 8 rates, rx and tx
    assert_eq!(tally(&fit).pass, 32);
}

#[test]
fn test_sync_cable_pinned_to_shared_rate() {
    let registry = registry("sp3s sp1s 4 4 1\n");
    let harness = wired(&registry, MockOptions::default());
    let fit = SerialFit::new(registry, Arc::new(harness.clone()), fast_options());

    assert_eq!(run(&fit).verdict, Verdict::Passed);

    let pair = fit.registry().find("sp3s", "sp1s").unwrap();
    let counts = pair.rates().find(153600).unwrap().counts();
    assert_eq!(counts.rx_ok, 1);
    let counts = pair.rates().find(614400).unwrap().counts();
    assert_eq!(counts.rx_total(), 0);
    assert_eq!(harness.configurations("sp3s").len(), 1);
}

#[test]
fn test_one_way_cable_does_not_deadlock() {
    let registry = registry("sp1 sp2 2 2 1\nsp2 sp1 2 2 1\n");
    // Only sp1 -> sp2 is wired, so sp2 -> sp1 fails and quits its sweep
    let harness = LoopbackHarness::new(MockOptions::default());
    harness.route("sp1", "sp2");
    let options = RunOptions {
        quick_fail: true,
        timeout_multiplier: 10,
        ..fast_options()
    };
    let fit = SerialFit::new(registry, Arc::new(harness.clone()), options);

    let report = run(&fit);
    assert_eq!(report.verdict, Verdict::Failed);
    assert_eq!(report.summary, "sp2->sp1@1200, ");

    // The surviving direction configured the cable alone for the rest
    let rates: Vec<u32> = harness
        .configurations("sp2")
        .iter()
        .map(|line| line.baud)
        .collect();
    assert_eq!(rates, vec![1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200]);

    let pair = fit.registry().find("sp2", "sp1").unwrap();
    for (rate, counts) in pair.rates().snapshot() {
        assert_eq!(counts.rx_ok, 1, "rx at {}", rate);
    }
}

#[test]
fn test_unblock_policy_cabled_cycles() {
    let registry = registry("sp1 sp2 2 2 1\nsp2 sp1 2 2 1\n");
    let harness = wired(&registry, MockOptions::default());
    let options = RunOptions {
        wait: WaitPolicy::Unblock {
            timeout: Duration::from_secs(2),
        },
        iterations: 2,
        ..fast_options()
    };
    let fit = SerialFit::new(registry, Arc::new(harness), options);

    let report = run(&fit);
    assert_eq!(report.verdict, Verdict::Passed, "{}", report.summary);
    assert_eq!(report.cycles, 2);
    assert_eq!(tally(&fit).pass, 64);
}

// ============================================================================
// Receive strategies
// ============================================================================

fn fragmented_run(strategy: RxStrategy) -> (RunReport, Tally) {
    let registry = registry("sp1 sp1 10 10 1\n");
    let harness = wired(
        &registry,
        MockOptions {
            max_read: Some(6),
            ..MockOptions::default()
        },
    );
    let options = RunOptions {
        baud_override: Some(9600),
        strategy,
        ..fast_options()
    };
    let fit = SerialFit::new(registry, Arc::new(harness), options);
    let report = run(&fit);
    let tally = tally(&fit);
    (report, tally)
}

#[test]
fn test_reassemble_joins_fragments() {
    let (report, tally) = fragmented_run(RxStrategy::Reassemble);
    assert_eq!(report.verdict, Verdict::Passed);
    assert_eq!(tally.pass, 2);
}

#[test]
fn test_byte_at_a_time_ignores_fragmentation() {
    let (report, _) = fragmented_run(RxStrategy::ByteAtATime);
    assert_eq!(report.verdict, Verdict::Passed);
}

#[test]
fn test_single_shot_fails_on_fragment() {
    let (report, tally) = fragmented_run(RxStrategy::SingleShot);
    assert_eq!(report.verdict, Verdict::Failed);
    assert_eq!(tally.rx_fail, 1);
    // The write itself went through
    assert_eq!(tally.pass, 1);
    assert_eq!(report.summary, "sp1->sp1@9600, ");
}

fn short_write_run(strategy: RxStrategy) -> (RunReport, SerialFit) {
    let registry = registry("sp1 sp1 10 10 1\n");
    let harness = wired(
        &registry,
        MockOptions {
            max_write: Some(6),
            ..MockOptions::default()
        },
    );
    let options = RunOptions {
        baud_override: Some(115200),
        strategy,
        ..fast_options()
    };
    let fit = SerialFit::new(registry, Arc::new(harness), options);
    let report = run(&fit);
    (report, fit)
}

#[test]
fn test_short_write_tolerated_when_reassembling() {
    let (report, fit) = short_write_run(RxStrategy::Reassemble);
    assert_eq!(report.verdict, Verdict::Failed);

    let pair = fit.registry().find("sp1", "sp1").unwrap();
    let counts = pair.rates().find(115200).unwrap().counts();
    assert_eq!(counts.tx_ok, 1);
    assert_eq!(counts.tx_ng, 0);

    // The missing tail never arrives
    let t = tally(&fit);
    assert_eq!(t.tx_fail, 0);
    assert_eq!(t.rx_timeout, 1);
}

#[test]
fn test_short_write_fails_single_shot() {
    let (report, fit) = short_write_run(RxStrategy::SingleShot);
    assert_eq!(report.verdict, Verdict::Failed);

    let pair = fit.registry().find("sp1", "sp1").unwrap();
    let counts = pair.rates().find(115200).unwrap().counts();
    assert_eq!(counts.tx_ok, 0);
    assert_eq!(counts.tx_ng, 1);
    assert_eq!(tally(&fit).tx_fail, 1);
}

// ============================================================================
// Failures and edge cases
// ============================================================================

#[test]
fn test_baud_override_outside_table_runs_nothing() {
    let registry = registry("sp1 sp1 4 4 1\n");
    let harness = wired(&registry, MockOptions::default());
    let options = RunOptions {
        baud_override: Some(1234),
        ..fast_options()
    };
    let fit = SerialFit::new(registry, Arc::new(harness.clone()), options);

    let report = run(&fit);
    assert_eq!(report.verdict, Verdict::DidNotRun);
    assert_eq!(tally(&fit).pass, 0);
    assert!(harness.configurations("sp1").is_empty());
}

#[test]
fn test_quick_fail_stops_after_first_frame() {
    let registry = registry("sp2 sp2 4 8 3\n");
    let harness = wired(
        &registry,
        MockOptions {
            corrupt: true,
            ..MockOptions::default()
        },
    );
    let options = RunOptions {
        quick_fail: true,
        ..fast_options()
    };
    let fit = SerialFit::new(registry, Arc::new(harness.clone()), options);

    let report = run(&fit);
    assert_eq!(report.verdict, Verdict::Failed);
    assert_eq!(report.summary, "sp2->sp2@1200, ");

    let t = tally(&fit);
    assert_eq!(t.rx_fail, 1);
    assert_eq!(t.pass, 1);

    // The sweep never got past the first rate
    assert_eq!(harness.configurations("sp2").len(), 1);
}

#[test]
fn test_corrupt_frames_fail_every_rate() {
    let registry = registry("sp8 sp8 3 3 1\n");
    let harness = wired(
        &registry,
        MockOptions {
            corrupt: true,
            ..MockOptions::default()
        },
    );
    let fit = SerialFit::new(registry, Arc::new(harness), fast_options());

    let report = run(&fit);
    assert_eq!(report.verdict, Verdict::Failed);
    assert_eq!(tally(&fit).rx_fail, 8);
    assert_eq!(report.summary.matches("sp8->sp8@").count(), 8);
}

#[test]
fn test_unplugged_cable_times_out() {
    let registry = registry("sp1 sp3 2 2 1\n");
    // No routes: every write is dropped
    let harness = LoopbackHarness::new(MockOptions::default());
    let options = RunOptions {
        baud_override: Some(115200),
        timeout_multiplier: 1,
        ..fast_options()
    };
    let fit = SerialFit::new(registry, Arc::new(harness), options);

    let report = run(&fit);
    assert_eq!(report.verdict, Verdict::Failed);
    assert_eq!(tally(&fit).rx_timeout, 1);
    assert_eq!(report.summary, "sp3->sp1@115200, ");
}

#[test]
fn test_stalled_writer_times_out() {
    let registry = registry("sp1 sp1 2 2 2\n");
    let harness = wired(
        &registry,
        MockOptions {
            write_stall: Some(Duration::from_millis(300)),
            ..MockOptions::default()
        },
    );
    let options = RunOptions {
        baud_override: Some(115200),
        timeout_multiplier: 1,
        writer_poll_limit: 5,
        ..fast_options()
    };
    let fit = SerialFit::new(registry, Arc::new(harness), options);

    // First frame times out at the receiver while the write hangs, the
    // second finds the writer still busy
    let report = run(&fit);
    assert_eq!(report.verdict, Verdict::Failed);
    let t = tally(&fit);
    assert_eq!(t.tx_fail, 1);
    assert_eq!(t.rx_timeout, 1);
}

#[test]
fn test_interrupted_run_reports_interrupt() {
    let registry = registry("sp1 sp1 1 1 1\n");
    let harness = wired(&registry, MockOptions::default());
    let fit = SerialFit::new(registry, Arc::new(harness), fast_options());

    let keep_going = Arc::new(AtomicBool::new(false));
    let report = fit.run(&keep_going);

    assert!(report.interrupted);
    assert_eq!(report.cycles, 0);
    assert_eq!(tally(&fit).interrupt, 1);
    assert!(fit.results().verdict().is_some());
}
