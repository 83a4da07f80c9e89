//! Flash command implementation.

use anyhow::{Context, Result};
use console::style;
use geckoflash::{FlasherConfig, GeckoFlasher};
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::progress::UploadProgress;
use crate::{Cli, baud_rate, get_port, use_fancy_output};

/// Arguments of the `flash` command after defaults are applied.
#[derive(Debug, Clone)]
pub(crate) struct FlashOptions {
    /// Firmware image to upload.
    pub firmware: PathBuf,
    /// Stay in the bootloader after the upload.
    pub no_exit: bool,
    /// Attempts per block, overriding the config.
    pub max_retries: Option<u32>,
    /// Prompt timeout in seconds, overriding the config.
    pub prompt_timeout: Option<u64>,
}

/// Session settings from command-line options layered over the config file.
pub(crate) fn flasher_config(options: &FlashOptions, config: &Config) -> FlasherConfig {
    let mut flasher_config = FlasherConfig::default();

    if let Some(secs) = options
        .prompt_timeout
        .or(config.flash.prompt_timeout_secs)
    {
        flasher_config.menu.prompt_timeout = Duration::from_secs(secs);
    }
    if let Some(retries) = options
        .max_retries
        .or(config.flash.max_retries)
    {
        flasher_config.xmodem.max_retries = retries.max(1);
    }
    flasher_config.exit_after_upload =
        !options.no_exit && config.flash.exit_bootloader.unwrap_or(true);

    flasher_config
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &Config, options: &FlashOptions) -> Result<()> {
    let firmware = &options.firmware;
    let mut image = File::open(firmware)
        .with_context(|| format!("Failed to open firmware image {}", firmware.display()))?;
    let image_len = image
        .metadata()
        .with_context(|| format!("Failed to read firmware image {}", firmware.display()))?
        .len();

    if !cli.quiet {
        println!(
            "{} Firmware {} ({} bytes)",
            style("📦").cyan(),
            firmware.display(),
            image_len
        );
    }

    let port = get_port(cli, config)?;
    let baud = baud_rate(cli, config);
    if !cli.quiet {
        println!("{} Using port {} at {} baud", style("🔌").cyan(), port, baud);
    }

    let mut flasher = GeckoFlasher::open(&port, baud)
        .with_context(|| format!("Failed to open serial port {port}"))?;
    *flasher.config_mut() = flasher_config(options, config);

    let mut progress = UploadProgress::new(cli.quiet, use_fancy_output());
    let result = flasher.flash(&mut image, |session| {
        progress.update(session);
    });
    flasher.close();

    match result {
        Ok(session) => {
            progress.finish();
            if !cli.quiet {
                println!(
                    "\n{} Upload complete: {} blocks, {} retries",
                    style("🎉").green().bold(),
                    session.success_count,
                    session.error_count
                );
            }
            Ok(())
        },
        Err(e) => {
            progress.abandon();
            Err(e).context("Flashing failed")
        },
    }
}
