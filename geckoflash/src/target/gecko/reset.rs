//! Control-line sequences that move the target in and out of the bootloader.
//!
//! DTR and RTS are wired to the module's reset and boot-select pins. Some
//! USB-serial bridges (CP210x among them) couple the two lines, so every RTS
//! change re-asserts the last DTR level.

use crate::error::Result;
use crate::port::Port;
use log::{debug, info, warn};
use std::thread;
use std::time::Duration;

/// Bytes sent while RTS is asserted to leave the bootloader.
pub const EXIT_COMMAND: &[u8] = b"2\r\n";

/// Delays used by the boot sequences.
#[derive(Debug, Clone)]
pub struct BootTiming {
    /// How long reset is held before being released.
    pub reset_pulse: Duration,
    /// Time the device needs to come up in the bootloader.
    pub boot_delay: Duration,
    /// How long RTS stays asserted after the exit command.
    pub exit_hold: Duration,
    /// Settle time after RTS is released on exit.
    pub exit_settle: Duration,
}

impl Default for BootTiming {
    fn default() -> Self {
        Self {
            reset_pulse: Duration::from_millis(100),
            boot_delay: Duration::from_secs(1),
            exit_hold: Duration::from_millis(100),
            exit_settle: Duration::from_millis(100),
        }
    }
}

/// Set RTS, then restore DTR to its last-set level.
pub fn set_rts_state<P: Port + ?Sized>(port: &mut P, level: bool) -> Result<()> {
    port.set_rts(level)?;
    let dtr = port.dtr();
    port.set_dtr(dtr)
}

/// Pulse the control lines so the device reboots into its bootloader.
///
/// A single attempt. Whether the bootloader actually started only shows up
/// later, when its menu prompt does or does not appear.
pub fn enter_bootloader<P: Port + ?Sized>(port: &mut P, timing: &BootTiming) -> Result<()> {
    debug!("Entering bootloader on {}", port.name());

    port.set_dtr(false)?;
    set_rts_state(port, true)?;

    thread::sleep(timing.reset_pulse);

    port.set_dtr(true)?;
    set_rts_state(port, false)?;

    thread::sleep(timing.boot_delay);

    Ok(())
}

/// Ask the bootloader to start the application.
///
/// Best effort: failures are logged and never returned.
pub fn exit_bootloader<P: Port + ?Sized>(port: &mut P, timing: &BootTiming) {
    debug!("Exiting bootloader on {}", port.name());

    if let Err(e) = set_rts_state(port, true) {
        warn!("Failed to assert RTS: {e}");
    }

    if let Err(e) = port.write_all_bytes(EXIT_COMMAND) {
        warn!("Error exiting: {e}");
    }

    thread::sleep(timing.exit_hold);

    if let Err(e) = set_rts_state(port, false) {
        warn!("Failed to release RTS: {e}");
    }

    thread::sleep(timing.exit_settle);

    info!("Boot mode exited.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{Line, MockPort};

    fn instant() -> BootTiming {
        BootTiming {
            reset_pulse: Duration::ZERO,
            boot_delay: Duration::ZERO,
            exit_hold: Duration::ZERO,
            exit_settle: Duration::ZERO,
        }
    }

    #[test]
    fn test_rts_change_reasserts_dtr() {
        let mut port = MockPort::silent();
        port.set_dtr(false).unwrap();
        set_rts_state(&mut port, true).unwrap();

        assert_eq!(
            port.lines,
            vec![Line::Dtr(false), Line::Rts(true), Line::Dtr(false)]
        );
    }

    #[test]
    fn test_enter_bootloader_sequence() {
        let mut port = MockPort::silent();
        enter_bootloader(&mut port, &instant()).unwrap();

        assert_eq!(
            port.lines,
            vec![
                Line::Dtr(false),
                Line::Rts(true),
                Line::Dtr(false),
                Line::Dtr(true),
                Line::Rts(false),
                Line::Dtr(true),
            ]
        );
        assert!(port.write_buf.is_empty());
    }

    #[test]
    fn test_exit_bootloader_sequence() {
        let mut port = MockPort::silent();
        exit_bootloader(&mut port, &instant());

        assert_eq!(port.write_buf, EXIT_COMMAND);
        assert_eq!(
            port.lines,
            vec![
                Line::Rts(true),
                Line::Dtr(true),
                Line::Rts(false),
                Line::Dtr(true),
            ]
        );
    }

    #[test]
    fn test_exit_bootloader_tolerates_write_failure() {
        let mut port = MockPort::silent();
        port.fail_writes = true;

        exit_bootloader(&mut port, &instant());

        assert!(port.write_buf.is_empty());
        assert_eq!(port.lines.last(), Some(&Line::Dtr(true)));
        assert!(port.lines.contains(&Line::Rts(false)));
    }
}
