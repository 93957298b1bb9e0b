//! Error types for serial-fit

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// serial-fit error types
///
/// Failed transfers are not errors: they surface as
/// [`Outcome`](crate::results::Outcome) values. These variants cover setup
/// problems that abort a descriptor or the whole run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device file could not be opened
    #[error("Cannot open {device}: {reason}")]
    DeviceOpen {
        /// Device name as written in the schedule (e.g. `sp1s`)
        device: String,
        /// Underlying failure
        reason: String,
    },

    /// Invalid settings or schedule content
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings file parse failure
    #[error("Settings parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Settings file serialization failure
    #[error("Settings serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Baud rate with no line-speed mapping for the requested protocol
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaud(u32),

    /// Worker thread could not be started
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
