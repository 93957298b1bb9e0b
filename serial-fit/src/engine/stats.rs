//! Statistics block and failure summary

use super::coordinator::ATC_TEST_STRING;
use crate::matrix::Registry;
use std::fmt::Write as _;

/// Longest failure summary handed to the results reporter
pub const SUMMARY_CAP: usize = 512;

/// Per-pair success ratios for every scheduled port pair
pub fn statistics_block(registry: &Registry, atc_test_string: bool) -> String {
    let mut out = String::new();

    for pair in registry.scheduled() {
        let plan = pair.plan();
        let _ = writeln!(out, "\n{}:", pair.label());
        let _ = writeln!(
            out,
            "\t{} iterations from {} to {} bytes",
            plan.iterations, plan.min_frame, plan.max_frame
        );
        if atc_test_string {
            let _ = writeln!(
                out,
                "\tATC test string used for first {} bytes",
                ATC_TEST_STRING.len()
            );
        } else {
            let _ = writeln!(out, "\tmessage size used for all data bytes");
        }

        for (rate, counts) in pair.rates().snapshot() {
            let _ = writeln!(
                out,
                "BAUD {:6}: success ratio: RX = {:08}/{:08} TX = {:08}/{:08}",
                rate,
                counts.rx_ok,
                counts.rx_total(),
                counts.tx_ok,
                counts.tx_total()
            );
        }
    }

    out
}

/// Log the statistics block, plus mean frame times at debug level
pub fn log_statistics(registry: &Registry, atc_test_string: bool) {
    for line in statistics_block(registry, atc_test_string).lines() {
        log::info!("{}", line);
    }

    if log::log_enabled!(log::Level::Debug) {
        for pair in registry.scheduled() {
            for entry in pair.rates().entries() {
                if let Some(mean) = entry.mean_frame_time() {
                    log::debug!(
                        "BAUD {:6} {:<4} frame time {:?} (mean over {} sizes)",
                        entry.rate(),
                        pair.rx_device(),
                        mean,
                        entry.timing_slots()
                    );
                }
            }
        }
    }
}

/// `tx->rx@baud, ` for every scheduled rate with an rx or tx failure,
/// capped at [`SUMMARY_CAP`] bytes
pub fn failure_summary(registry: &Registry) -> String {
    let mut summary = String::new();

    'pairs: for pair in registry.scheduled() {
        for (rate, counts) in pair.rates().snapshot() {
            if !counts.has_failures() {
                continue;
            }
            let item = format!("{}@{}, ", pair.label(), rate);
            if summary.len() + item.len() >= SUMMARY_CAP {
                log::info!("failure summary is full, {} and later entries dropped", item.trim_end_matches([',', ' ']));
                break 'pairs;
            }
            summary.push_str(&item);
        }
    }

    summary
}
