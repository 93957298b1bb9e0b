//! Schedule file parsing
//!
//! One test per line:
//!
//! ```text
//! # recv xmit min max iterations
//! sp2 sp1 1 32 10
//! sp1 sp2 128 256 4
//! ```
//!
//! Lines whose first token starts with `#` are comments. Lines that do not
//! carry five fields are skipped with a warning.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// One parsed schedule line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleLine {
    pub rx_device: String,
    pub tx_device: String,
    pub min_frame: usize,
    pub max_frame: usize,
    pub iterations: u32,
}

/// Parse schedule text
pub fn parse_schedule(text: &str) -> Vec<ScheduleLine> {
    let mut lines = Vec::new();

    for (lineno, raw) in text.lines().enumerate() {
        let fields: Vec<&str> = raw.split_whitespace().collect();
        match fields.first() {
            None => continue,
            Some(first) if first.starts_with('#') => continue,
            Some(_) => {}
        }

        match parse_fields(&fields) {
            Some(line) => lines.push(line),
            None => log::warn!("schedule line {}: cannot parse {:?}", lineno + 1, raw.trim()),
        }
    }

    lines
}

fn parse_fields(fields: &[&str]) -> Option<ScheduleLine> {
    let [rx, tx, min, max, iterations] = fields else {
        return None;
    };
    Some(ScheduleLine {
        rx_device: rx.to_string(),
        tx_device: tx.to_string(),
        min_frame: min.parse().ok()?,
        max_frame: max.parse().ok()?,
        iterations: iterations.parse().ok()?,
    })
}

/// Read and parse a schedule file
pub fn load_schedule<P: AsRef<Path>>(path: P) -> Result<Vec<ScheduleLine>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot open schedule {}: {}", path.display(), e)))?;
    Ok(parse_schedule(&text))
}
