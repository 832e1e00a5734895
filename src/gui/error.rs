use std::io;
use thiserror::Error;

/// Errors raised by the terminal UI.
#[derive(Debug, Error)]
pub enum SelectorError {
    /// The terminal could not be driven.
    #[error("terminal io error: {0}")]
    Io(#[from] io::Error),

    /// There is nothing to pick from.
    #[error("no serial devices found")]
    NoDevices,
}
