//! Error types for geckoflash.

use std::io;
use thiserror::Error;

/// Result type for geckoflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for geckoflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No serial port matched the device selection rules.
    #[error("No device with matching description found")]
    DeviceNotFound,

    /// The bootloader menu prompt never appeared.
    #[error("Bootloader menu not detected within {timeout_secs} seconds")]
    PromptNotDetected {
        /// How long the prompt was awaited.
        timeout_secs: u64,
    },

    /// The bootloader did not signal readiness after selecting upload mode.
    #[error("Did not enter upload mode: no ready signal from the bootloader")]
    UploadModeNotEntered,

    /// XMODEM transfer failure.
    #[error("XMODEM error: {0}")]
    Xmodem(String),
}
