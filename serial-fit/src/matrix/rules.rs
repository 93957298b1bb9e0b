//! Baud-rate sharing rule for synchronous cross-connects

use serde::{Deserialize, Serialize};

/// Which rates a synchronous cross-connect may use
///
/// A cable touching one of the `restricted` ports can only run at
/// `shared_rate`, unless both ends form one of the `unrestricted` pairs.
/// Self-loops and cables between other ports sweep their whole table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncBaudRule {
    pub restricted: Vec<String>,
    pub unrestricted: Vec<(String, String)>,
    pub shared_rate: u32,
}

impl Default for SyncBaudRule {
    fn default() -> Self {
        Self {
            restricted: vec!["sp3s".to_string(), "sp5s".to_string()],
            unrestricted: vec![("sp3s".to_string(), "sp5s".to_string())],
            shared_rate: 153600,
        }
    }
}

impl SyncBaudRule {
    pub fn permits(&self, rx: &str, tx: &str, rate: u32) -> bool {
        if rx == tx {
            return true;
        }
        let touches_restricted = self.restricted.iter().any(|p| p == rx || p == tx);
        if !touches_restricted {
            return true;
        }
        let unrestricted = self
            .unrestricted
            .iter()
            .any(|(a, b)| (a == rx && b == tx) || (a == tx && b == rx));
        unrestricted || rate == self.shared_rate
    }

    /// Ports named by the rule that are missing from `known`
    pub fn unknown_ports<'a>(&'a self, known: &[&str]) -> Vec<&'a str> {
        self.restricted
            .iter()
            .map(String::as_str)
            .chain(
                self.unrestricted
                    .iter()
                    .flat_map(|(a, b)| [a.as_str(), b.as_str()]),
            )
            .filter(|p| !known.contains(p))
            .collect()
    }
}
