//! serial-fit - Concurrent serial loopback test engine
//!
//! Drives loopback traffic over a board's serial ports: every scheduled port
//! pair gets a reader and a writer thread, each monitor cycle sweeps the
//! pair's baud table, and every frame received is checked byte for byte.
//!
//! ## Layout
//!
//! - [`matrix`]: the port pairs the board can be wired for, and the cable
//!   handshake between the two directions of a cross-connect
//! - [`transport`]: tty devices and the in-memory loopback harness
//! - [`engine`]: worker threads, the monitor loop and the run facade
//! - [`results`]: outcome tokens and the verdict reporter

pub mod baud;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod matrix;
pub mod results;
pub mod schedule;
pub mod transport;

// Re-export commonly used types
pub use config::Settings;
pub use engine::{RunOptions, RunReport, SerialFit};
pub use error::{Error, Result};
pub use matrix::Registry;
pub use results::{Outcome, Verdict};
