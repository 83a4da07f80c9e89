//! Gecko bootloader text menu.
//!
//! After a reset the bootloader prints a numbered menu ending in the prompt
//! `BL >`. Selecting `1` starts an XMODEM upload; the bootloader then sends
//! `'C'` once it is ready for the first block.

use crate::error::{Error, Result};
use crate::port::Port;
use log::{debug, trace};
use std::io::ErrorKind;
use std::thread;
use std::time::{Duration, Instant};

/// Prompt printed when the menu is ready for input.
pub const PROMPT: &str = "BL >";

/// Menu selection that starts an upload.
pub const UPLOAD_COMMAND: &[u8] = b"1\r\n";

/// Byte announcing that the receiver waits for the first block.
pub const READY_BYTE: u8 = b'C';

/// Timeouts and delays of the menu dialogue.
#[derive(Debug, Clone)]
pub struct MenuConfig {
    /// How long to wait for the prompt.
    pub prompt_timeout: Duration,
    /// Interval between polls of the receive buffer.
    pub poll_interval: Duration,
    /// Pause between clearing buffers and sending the selection.
    pub select_delay: Duration,
    /// Time the bootloader needs to switch into upload mode.
    pub mode_switch_delay: Duration,
    /// How long to wait for the ready byte.
    pub ready_timeout: Duration,
    /// Pause between the ready byte and the first XMODEM exchange.
    pub transfer_delay: Duration,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            prompt_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            select_delay: Duration::from_secs(1),
            mode_switch_delay: Duration::from_secs(2),
            ready_timeout: Duration::from_secs(10),
            transfer_delay: Duration::from_secs(1),
        }
    }
}

/// Read whatever the port has buffered right now.
fn read_waiting<P: Port + ?Sized>(port: &mut P, limit: usize) -> Result<Vec<u8>> {
    let waiting = usize::try_from(port.bytes_to_read()?).unwrap_or(usize::MAX);
    let mut buf = vec![0u8; waiting.min(limit)];
    if buf.is_empty() {
        return Ok(buf);
    }

    match port.read(&mut buf) {
        Ok(n) => buf.truncate(n),
        Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => buf.clear(),
        Err(e) => return Err(Error::Io(e)),
    }
    Ok(buf)
}

/// Collect incoming text until it contains `prompt` or `timeout` elapses.
///
/// Returns `Ok(false)` on timeout; only transport failures are errors.
pub fn await_prompt<P: Port + ?Sized>(
    port: &mut P,
    prompt: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<bool> {
    debug!("Waiting for bootloader prompt {prompt:?}");
    let deadline = Instant::now() + timeout;
    let mut text = String::new();

    while Instant::now() < deadline {
        let chunk = read_waiting(port, usize::MAX)?;
        if !chunk.is_empty() {
            text.push_str(&String::from_utf8_lossy(&chunk));
            trace!("Menu text so far: {text:?}");
            if text.contains(prompt) {
                debug!("Bootloader prompt detected");
                return Ok(true);
            }
        }
        thread::sleep(poll_interval);
    }

    Ok(false)
}

/// Poll for the single byte `ready`, discarding anything else.
pub fn await_ready<P: Port + ?Sized>(
    port: &mut P,
    ready: u8,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<bool> {
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        while port.bytes_to_read()? > 0 {
            match read_waiting(port, 1)?.first() {
                Some(&b) if b == ready => {
                    debug!("Received ready byte 0x{b:02X}");
                    return Ok(true);
                },
                Some(&b) => trace!("Discarding 0x{b:02X} while waiting for ready byte"),
                None => break,
            }
        }
        thread::sleep(poll_interval);
    }

    Ok(false)
}

/// Select the upload entry of the menu and wait until the receiver is ready.
pub fn select_upload_mode<P: Port + ?Sized>(port: &mut P, config: &MenuConfig) -> Result<bool> {
    port.clear_buffers()?;
    thread::sleep(config.select_delay);

    debug!("Selecting upload mode");
    port.write_all_bytes(UPLOAD_COMMAND)?;
    thread::sleep(config.mode_switch_delay);

    await_ready(port, READY_BYTE, config.ready_timeout, config.poll_interval)
}
