//! Settings file for serial-fit
//!
//! Every field is optional in the TOML file; missing fields take the
//! defaults below. Command line flags override individual fields after the
//! file is loaded.

use crate::engine::{MonitorPolicy, RunOptions, RxStrategy};
use crate::error::{Error, Result};
use crate::matrix::{SyncBaudRule, known_devices};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub test: TestConfig,
    pub logging: LoggingConfig,
    /// Which sync cables may share the high-speed rate
    pub sync_rule: SyncBaudRule,
}

/// Test run parameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TestConfig {
    /// RTS/CTS flow control on async lines
    pub flow_control: bool,
    /// Single baud rate to exercise, 0 sweeps the whole table
    pub baud_override: u32,
    pub monitor: MonitorPolicy,
    /// Monitor cycles, 0 runs until interrupted
    pub iterations: u32,
    /// 0 single read, 1 byte at a time, 2 reassemble fragments
    pub rx_strategy: RxStrategy,
    pub timeout_multiplier: u32,
    pub quick_fail: bool,
    pub atc_test_string: bool,
    /// Directory holding the serial device nodes
    pub device_dir: PathBuf,
    /// Schedule file, if not given on the command line
    pub schedule: Option<PathBuf>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            flow_control: false,
            baud_override: 0,
            monitor: MonitorPolicy::Block,
            iterations: 1,
            rx_strategy: RxStrategy::Reassemble,
            timeout_multiplier: 1000,
            quick_fail: false,
            atc_test_string: false,
            device_dir: PathBuf::from("/dev"),
            schedule: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let settings: Settings = toml::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings back out as TOML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.test.timeout_multiplier == 0 {
            return Err(Error::Config(
                "timeout_multiplier must be at least 1".to_string(),
            ));
        }
        let unknown = self.sync_rule.unknown_ports(&known_devices());
        if !unknown.is_empty() {
            log::warn!("sync_rule names unknown ports: {}", unknown.join(", "));
        }
        Ok(())
    }

    /// Engine options for these settings
    pub fn run_options(&self) -> RunOptions {
        let test = &self.test;
        RunOptions {
            flow_control: test.flow_control,
            baud_override: (test.baud_override != 0).then_some(test.baud_override),
            strategy: test.rx_strategy,
            timeout_multiplier: test.timeout_multiplier,
            quick_fail: test.quick_fail,
            atc_test_string: test.atc_test_string,
            iterations: test.iterations,
            wait: test.monitor.into(),
            ..RunOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WaitPolicy;

    #[test]
    fn test_default_config() {
        let settings = Settings::default();
        assert_eq!(settings.test.iterations, 1);
        assert_eq!(settings.test.rx_strategy, RxStrategy::Reassemble);
        assert_eq!(settings.test.device_dir, PathBuf::from("/dev"));
        assert_eq!(settings.logging.level, "info");

        let options = settings.run_options();
        assert!(options.baud_override.is_none());
        assert_eq!(options.wait, WaitPolicy::Block);
    }

    #[test]
    fn test_toml_serialization() {
        let settings = Settings::default();
        let toml_string = toml::to_string_pretty(&settings).unwrap();

        assert!(toml_string.contains("[test]"));
        assert!(toml_string.contains("[logging]"));
        assert!(toml_string.contains("[sync_rule]"));
        assert!(toml_string.contains("rx_strategy = 2"));
        assert!(toml_string.contains("monitor = \"block\""));

        let back: Settings = toml::from_str(&toml_string).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[test]
baud_override = 9600
monitor = "scroll"
iterations = 0
rx_strategy = 0
quick_fail = true

[logging]
level = "debug"
"#;

        let settings: Settings = toml::from_str(toml_content).unwrap();
        assert_eq!(settings.test.monitor, MonitorPolicy::Scroll);
        assert_eq!(settings.test.rx_strategy, RxStrategy::SingleShot);
        assert_eq!(settings.test.timeout_multiplier, 1000);
        assert_eq!(settings.logging.level, "debug");

        let options = settings.run_options();
        assert_eq!(options.baud_override, Some(9600));
        assert_eq!(options.iterations, 0);
        assert!(options.quick_fail);
    }

    #[test]
    fn test_bad_strategy_rejected() {
        assert!(toml::from_str::<Settings>("[test]\nrx_strategy = 7\n").is_err());
    }

    #[test]
    fn test_load_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.toml");

        let mut settings = Settings::default();
        settings.test.quick_fail = true;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert!(loaded.test.quick_fail);

        std::fs::write(&path, "[test]\ntimeout_multiplier = 0\n").unwrap();
        assert!(matches!(Settings::load(&path), Err(Error::Config(_))));
        assert!(matches!(
            Settings::load(dir.path().join("missing.toml")),
            Err(Error::Config(_))
        ));
    }
}
