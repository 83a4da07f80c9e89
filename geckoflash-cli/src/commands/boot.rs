//! Exit-boot command implementation.

use anyhow::{Context, Result};
use console::style;
use geckoflash::GeckoFlasher;

use crate::config::Config;
use crate::{Cli, baud_rate, get_port};

/// Send the exit sequence to a device left in its bootloader.
pub(crate) fn cmd_exit_boot(cli: &Cli, config: &Config) -> Result<()> {
    let port = get_port(cli, config)?;
    let baud = baud_rate(cli, config);
    if !cli.quiet {
        println!("{} Using port {} at {} baud", style("🔌").cyan(), port, baud);
    }

    let mut flasher = GeckoFlasher::open(&port, baud)
        .with_context(|| format!("Failed to open serial port {port}"))?;
    flasher.exit_bootloader();
    flasher.close();

    if !cli.quiet {
        println!("{} Application started", style("✓").green());
    }

    Ok(())
}
