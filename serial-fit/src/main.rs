//! serial-fit - serial loopback test for the controller's serial ports
//!
//! Reads the schedule of port pairs to exercise, runs them concurrently and
//! exits 0 when every transfer passed, 1 otherwise. Ctrl-C stops the run at
//! the next monitor cycle and still prints statistics and the verdict.

use clap::Parser;
use serial_fit::engine::{MonitorPolicy, RxStrategy};
use serial_fit::matrix::Registry;
use serial_fit::schedule::load_schedule;
use serial_fit::transport::{Connector, LoopbackHarness, MockOptions, TtyConnector};
use serial_fit::{Error, Result, SerialFit, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Serial loopback test
#[derive(Parser, Debug)]
#[command(name = "serial-fit", version)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Schedule file: `rx tx min max iterations` per line
    #[arg(short, long)]
    schedule: Option<PathBuf>,

    /// Enable RTS/CTS flow control on async ports
    #[arg(short = 'f', long)]
    flow_control: bool,

    /// Exercise only this baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// How the monitor waits for readers
    #[arg(short, long, value_enum)]
    monitor: Option<MonitorPolicy>,

    /// Monitor cycles to run (0 = until interrupted)
    #[arg(short, long)]
    iterations: Option<u32>,

    /// Receive strategy: 0 single read, 1 byte at a time, 2 reassemble
    #[arg(short = 'x', long, value_parser = clap::value_parser!(u8).range(0..=2))]
    rx_strategy: Option<u8>,

    /// Receive deadline multiplier
    #[arg(short = 'y', long)]
    timeout_multiplier: Option<u32>,

    /// Stop a pair's sweep at its first failure
    #[arg(short, long)]
    quick_fail: bool,

    /// Overlay the ATC 6.24 test string on every frame
    #[arg(short, long)]
    atc_test_string: bool,

    /// Directory holding the serial device nodes
    #[arg(long)]
    device_dir: Option<PathBuf>,

    /// Run over in-memory loopback cables instead of real devices
    #[arg(long)]
    simulate: bool,

    /// With --simulate, deliver at most this many bytes per read
    #[arg(long, requires = "simulate")]
    simulate_fragment: Option<usize>,
}

impl Cli {
    /// Apply command line overrides on top of the settings file
    fn merge(&self, settings: &mut Settings) -> Result<()> {
        let test = &mut settings.test;
        if self.flow_control {
            test.flow_control = true;
        }
        if let Some(baud) = self.baud {
            test.baud_override = baud;
        }
        if let Some(monitor) = self.monitor {
            test.monitor = monitor;
        }
        if let Some(iterations) = self.iterations {
            test.iterations = iterations;
        }
        if let Some(strategy) = self.rx_strategy {
            test.rx_strategy = RxStrategy::try_from(strategy).map_err(Error::Config)?;
        }
        if let Some(multiplier) = self.timeout_multiplier {
            test.timeout_multiplier = multiplier;
        }
        if self.quick_fail {
            test.quick_fail = true;
        }
        if self.atc_test_string {
            test.atc_test_string = true;
        }
        if let Some(dir) = &self.device_dir {
            test.device_dir = dir.clone();
        }
        if let Some(schedule) = &self.schedule {
            test.schedule = Some(schedule.clone());
        }
        settings.validate()
    }
}

fn main() {
    let cli = Cli::parse();
    let code = if run(&cli) { 0 } else { 1 };
    std::process::exit(code);
}

/// Run the test and return whether it passed. Setup errors still end
/// with a verdict block.
fn run(cli: &Cli) -> bool {
    let loaded = match &cli.settings {
        Some(path) => Settings::load(path),
        None => Ok(Settings::default()),
    };

    // Initialize logger
    let level = loaded
        .as_ref()
        .map_or("info", |settings| settings.logging.level.as_str());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    log::info!("serial-fit v{} starting...", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &cli.settings {
        log::info!("Using settings: {}", path.display());
    }

    let keep_going = Arc::new(AtomicBool::new(true));
    let report = match loaded.and_then(|settings| prepare(cli, settings, &keep_going)) {
        Ok(fit) => fit.run(&keep_going),
        Err(e) => {
            eprintln!("serial-fit: {}", e);
            SerialFit::setup_failed(&e)
        }
    };

    log::info!("{} monitor cycles completed", report.cycles);
    report.verdict.is_success()
}

/// Merge the command line, schedule the pairs and pick the devices
fn prepare(cli: &Cli, mut settings: Settings, keep_going: &Arc<AtomicBool>) -> Result<SerialFit> {
    cli.merge(&mut settings)?;

    let mut registry = Registry::standard(settings.sync_rule.clone());
    match &settings.test.schedule {
        Some(path) => {
            let lines = load_schedule(path)?;
            let matched = registry.apply_schedule(&lines);
            log::info!(
                "{} of {} schedule lines matched a port pair",
                matched,
                lines.len()
            );
        }
        None => log::warn!("No schedule file given, nothing to run"),
    }

    let connector: Arc<dyn Connector> = if cli.simulate {
        let harness = LoopbackHarness::new(MockOptions {
            max_read: cli.simulate_fragment,
            ..MockOptions::default()
        });
        for pair in registry.scheduled() {
            harness.route(pair.tx_device(), pair.rx_device());
        }
        log::info!("Simulating loopback cables");
        Arc::new(harness)
    } else {
        Arc::new(TtyConnector::new(&settings.test.device_dir))
    };

    // Set up interrupt handler
    let flag = Arc::clone(keep_going);
    ctrlc::set_handler(move || {
        log::info!("Received interrupt, finishing the current cycle");
        flag.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    Ok(SerialFit::new(registry, connector, settings.run_options()))
}
