//! # geckoflash
//!
//! A library for flashing Silicon Labs Gecko modules over a serial port.
//!
//! The Gecko bootloader is reached by pulsing DTR/RTS, answers with a text
//! menu ending in `BL >`, and accepts firmware images (`.gbl`) over XMODEM.
//! This crate provides:
//!
//! - Control-line sequences to enter and leave the bootloader
//! - The menu dialogue that switches the bootloader into upload mode
//! - An XMODEM sender (128-byte blocks, checksum or CRC16)
//! - Serial port discovery by USB description and VID/PID
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use geckoflash::GeckoFlasher;
//! use std::fs::File;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let mut image = File::open("firmware.gbl")?;
//!         let mut flasher = GeckoFlasher::open("/dev/ttyUSB0", 115_200)?;
//!
//!         flasher.flash(&mut image, |session| {
//!             println!("Uploading... {}%", session.percent());
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod port;
pub mod protocol;
pub mod target;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{
        DEFAULT_DESCRIPTION_MATCHES, DetectedPort, DeviceKind, detect_ports, format_port_list,
    },
    error::{Error, Result},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Block, BlockCheck, TransferSession, XmodemConfig, XmodemTransfer},
    target::{BootTiming, FlasherConfig, GeckoFlasher, MenuConfig},
};
