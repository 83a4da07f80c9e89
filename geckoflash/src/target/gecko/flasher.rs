//! Gecko bootloader flasher.
//!
//! A flashing session runs four steps on one exclusively owned port:
//!
//! 1. pulse DTR/RTS to reboot the device into its bootloader,
//! 2. wait for the `BL >` menu and select the upload entry,
//! 3. send the image over XMODEM,
//! 4. pulse RTS again and ask the bootloader to run the application.
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
//!         let mut flasher = GeckoFlasher::open("/dev/ttyUSB0", 115200)?;
//!         let mut image = File::open("firmware.gbl")?;
//!
//!         flasher.flash(&mut image, |session| {
//!             println!("Uploading... {}%", session.percent());
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::xmodem::{TransferSession, XmodemConfig, XmodemTransfer};
use crate::target::gecko::menu::{self, MenuConfig};
use crate::target::gecko::reset::{self, BootTiming};
use log::{debug, info};
use std::io::{Read, Seek};
use std::thread;

/// Settings for a flashing session.
#[derive(Debug, Clone)]
pub struct FlasherConfig {
    /// Control-line timings.
    pub boot: BootTiming,
    /// Menu dialogue timeouts.
    pub menu: MenuConfig,
    /// Transfer engine settings.
    pub xmodem: XmodemConfig,
    /// Leave the bootloader after a successful upload.
    pub exit_after_upload: bool,
}

impl Default for FlasherConfig {
    fn default() -> Self {
        Self {
            boot: BootTiming::default(),
            menu: MenuConfig::default(),
            // The bootloader keeps repeating 'C' while idle, so the engine
            // picks it up again and negotiates the block check itself.
            xmodem: XmodemConfig {
                await_start: true,
                ..XmodemConfig::default()
            },
            exit_after_upload: true,
        }
    }
}

/// Gecko bootloader flasher.
///
/// Generic over the port type `P`, which must implement the `Port` trait.
pub struct GeckoFlasher<P: Port> {
    port: P,
    config: FlasherConfig,
}

impl<P: Port> GeckoFlasher<P> {
    /// Create a new flasher with an existing port.
    pub fn new(port: P) -> Self {
        Self::with_config(port, FlasherConfig::default())
    }

    /// Create a new flasher with custom settings.
    pub fn with_config(port: P, config: FlasherConfig) -> Self {
        Self { port, config }
    }

    /// Get the session settings.
    pub fn config(&self) -> &FlasherConfig {
        &self.config
    }

    /// Get mutable access to the session settings.
    pub fn config_mut(&mut self) -> &mut FlasherConfig {
        &mut self.config
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the flasher and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Reboot the device into its bootloader.
    pub fn enter_bootloader(&mut self) -> Result<()> {
        info!("Entering boot mode...");
        reset::enter_bootloader(&mut self.port, &self.config.boot)
    }

    /// Ask the bootloader to start the application. Best effort.
    pub fn exit_bootloader(&mut self) {
        info!("Exiting boot mode...");
        reset::exit_bootloader(&mut self.port, &self.config.boot);
    }

    /// Drive the bootloader menu and transfer `image`.
    ///
    /// The device must already be in its bootloader. The transfer engine is
    /// only started once the menu prompt and the ready byte have been seen.
    pub fn upload_firmware<R, F>(&mut self, image: &mut R, progress: F) -> Result<TransferSession>
    where
        R: Read + Seek,
        F: FnMut(&TransferSession),
    {
        let menu_config = &self.config.menu;

        info!("Waiting for bootloader menu on {}...", self.port.name());
        if !menu::await_prompt(
            &mut self.port,
            menu::PROMPT,
            menu_config.prompt_timeout,
            menu_config.poll_interval,
        )? {
            return Err(Error::PromptNotDetected {
                timeout_secs: menu_config
                    .prompt_timeout
                    .as_secs(),
            });
        }

        if !menu::select_upload_mode(&mut self.port, menu_config)? {
            return Err(Error::UploadModeNotEntered);
        }
        info!("Upload mode entered");

        thread::sleep(menu_config.transfer_delay);

        let mut xmodem = XmodemTransfer::with_config(&mut self.port, self.config.xmodem.clone());
        let session = xmodem.send(image, progress)?;

        info!("Upload successful!");
        Ok(session)
    }

    /// Run a complete session: enter the bootloader, upload, and exit again.
    ///
    /// The bootloader is only left when the upload succeeded, so a failed
    /// device stays in the bootloader for another attempt.
    pub fn flash<R, F>(&mut self, image: &mut R, progress: F) -> Result<TransferSession>
    where
        R: Read + Seek,
        F: FnMut(&TransferSession),
    {
        self.enter_bootloader()?;

        let session = self.upload_firmware(image, progress)?;

        if self.config.exit_after_upload {
            self.exit_bootloader();
        } else {
            debug!("Staying in bootloader as requested");
        }

        Ok(session)
    }

    /// Close the port.
    pub fn close(&mut self) {
        let _ = self.port.close();
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{Error, GeckoFlasher, Result};
    use crate::port::{NativePort, SerialConfig};
    use log::{debug, warn};
    use std::thread;
    use std::time::Duration;

    impl GeckoFlasher<NativePort> {
        /// Open a serial port and create a flasher with default settings.
        ///
        /// The port is opened with the bootloader's line settings (8N1,
        /// XON/XOFF, 10 s timeout).
        pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
            Self::open_with_retry(port_name, baud_rate)
        }

        /// Open serial port with retry mechanism.
        fn open_with_retry(port_name: &str, baud_rate: u32) -> Result<Self> {
            const MAX_OPEN_PORT_ATTEMPTS: usize = 3;
            const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

            let mut last_error = None;

            for attempt in 1..=MAX_OPEN_PORT_ATTEMPTS {
                let config = SerialConfig::new(port_name, baud_rate);
                match NativePort::open(&config) {
                    Ok(port) => {
                        if attempt > 1 {
                            debug!("Port opened on attempt {attempt}");
                        }
                        return Ok(Self::new(port));
                    },
                    Err(e) => {
                        warn!(
                            "Failed to open port {port_name} (attempt {attempt}/{MAX_OPEN_PORT_ATTEMPTS}): {e}"
                        );
                        last_error = Some(e);

                        if attempt < MAX_OPEN_PORT_ATTEMPTS {
                            thread::sleep(OPEN_RETRY_DELAY);
                        }
                    },
                }
            }

            Err(last_error.unwrap_or(Error::DeviceNotFound))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{Line, MockPort};
    use crate::protocol::xmodem::{BlockCheck, control};
    use crate::target::gecko::reset::EXIT_COMMAND;
    use std::io::Cursor;
    use std::time::Duration;

    const BANNER: &[u8] = b"Gecko Bootloader v1.12.0\r\n1. upload gbl\r\n2. run\r\n3. ebl info\r\nBL > ";

    fn instant_config() -> FlasherConfig {
        FlasherConfig {
            boot: BootTiming {
                reset_pulse: Duration::ZERO,
                boot_delay: Duration::ZERO,
                exit_hold: Duration::ZERO,
                exit_settle: Duration::ZERO,
            },
            menu: MenuConfig {
                prompt_timeout: Duration::from_millis(20),
                poll_interval: Duration::ZERO,
                select_delay: Duration::ZERO,
                mode_switch_delay: Duration::ZERO,
                ready_timeout: Duration::from_millis(20),
                transfer_delay: Duration::ZERO,
            },
            xmodem: XmodemConfig {
                ack_timeout: Duration::from_millis(5),
                start_timeout: Duration::from_millis(20),
                turnaround_delay: Duration::ZERO,
                ..FlasherConfig::default().xmodem
            },
            exit_after_upload: true,
        }
    }

    /// Device output after the upload selection: echo, ready byte, the
    /// repeated 'C' picked up by the engine, then `acks` acknowledgments.
    fn upload_answer(acks: usize) -> Vec<u8> {
        let mut answer = b"1\r\nbegin upload\r\nC".to_vec();
        answer.push(control::C);
        answer.extend(std::iter::repeat_n(control::ACK, acks));
        answer
    }

    #[test]
    fn test_flash_full_session() {
        let port = MockPort::new(BANNER).then_after_clear(&upload_answer(4));
        let mut flasher = GeckoFlasher::with_config(port, instant_config());
        let mut image = Cursor::new(vec![0x5A; 300]);
        let mut successes = Vec::new();

        let session = flasher
            .flash(&mut image, |s| successes.push(s.success_count))
            .expect("flash should succeed");

        assert_eq!(successes, vec![1, 2, 3]);
        assert_eq!(session.check, BlockCheck::Crc16);

        let port = flasher.into_port();
        assert!(port.write_buf.starts_with(b"1\r\n"));
        assert!(port.write_buf.ends_with(EXIT_COMMAND));
        // selection + 3 CRC blocks + EOT + exit command
        assert_eq!(port.write_buf.len(), 3 + 3 * 133 + 1 + 3);
        assert_eq!(&port.lines[..2], &[Line::Dtr(false), Line::Rts(true)]);
        assert_eq!(port.lines.last(), Some(&Line::Dtr(true)));
    }

    #[test]
    fn test_upload_without_prompt_never_starts_transfer() {
        let mut flasher = GeckoFlasher::with_config(MockPort::silent(), instant_config());
        let mut image = Cursor::new(vec![0u8; 300]);
        let mut progress_calls = 0;

        flasher
            .enter_bootloader()
            .unwrap();
        let result = flasher.upload_firmware(&mut image, |_| progress_calls += 1);

        assert!(matches!(result, Err(Error::PromptNotDetected { .. })));
        assert_eq!(progress_calls, 0);
        assert!(flasher.port().write_buf.is_empty());
        assert_eq!(image.position(), 0);
    }

    #[test]
    fn test_flash_without_prompt_stays_in_bootloader() {
        let mut flasher = GeckoFlasher::with_config(MockPort::silent(), instant_config());
        let mut image = Cursor::new(vec![0u8; 10]);

        let result = flasher.flash(&mut image, |_| {});

        assert!(matches!(result, Err(Error::PromptNotDetected { .. })));
        assert!(!flasher.port().write_buf.ends_with(EXIT_COMMAND));
    }

    #[test]
    fn test_upload_without_ready_byte() {
        let port = MockPort::new(BANNER).then_after_clear(b"1\r\n");
        let mut flasher = GeckoFlasher::with_config(port, instant_config());
        let mut image = Cursor::new(vec![0u8; 10]);

        let result = flasher.upload_firmware(&mut image, |_| {});

        assert!(matches!(result, Err(Error::UploadModeNotEntered)));
        assert_eq!(flasher.port().write_buf, b"1\r\n");
    }

    #[test]
    fn test_failed_transfer_skips_exit() {
        let mut answer = b"C".to_vec();
        answer.push(control::NAK);
        answer.extend(std::iter::repeat_n(control::NAK, 10));
        let port = MockPort::new(BANNER).then_after_clear(&answer);
        let mut flasher = GeckoFlasher::with_config(port, instant_config());
        let mut image = Cursor::new(vec![0u8; 10]);

        let result = flasher.flash(&mut image, |_| {});

        assert!(matches!(result, Err(Error::Xmodem(_))));
        let port = flasher.into_port();
        assert!(!port.write_buf.ends_with(EXIT_COMMAND));
        assert_eq!(port.lines.len(), 6);
    }

    #[test]
    fn test_flash_can_stay_in_bootloader() {
        let port = MockPort::new(BANNER).then_after_clear(&upload_answer(2));
        let mut config = instant_config();
        config.exit_after_upload = false;
        let mut flasher = GeckoFlasher::with_config(port, config);
        let mut image = Cursor::new(vec![1u8; 16]);

        flasher
            .flash(&mut image, |_| {})
            .expect("flash should succeed");

        let port = flasher.into_port();
        assert_eq!(port.write_buf.last(), Some(&control::EOT));
    }
}
