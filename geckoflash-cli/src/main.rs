//! geckoflash CLI - Command-line tool for flashing Gecko bootloader devices.
//!
//! ## Features
//!
//! - Flash `.gbl` images over XMODEM through the bootloader menu
//! - Auto-detection of CP210x/Zigbee serial ports
//! - Interactive serial port selection
//! - Configuration files and environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod progress;
mod serial;

use config::Config;
use serial::{SerialOptions, select_serial_port};

/// Whether stdout is a terminal (set once at startup).
static STDOUT_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if the progress bar should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDOUT_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled()
}

/// geckoflash - Flash Silicon Labs Gecko modules over the serial bootloader.
///
/// Environment variables:
///   GECKOFLASH_PORT              - Default serial port
///   GECKOFLASH_BAUD              - Default baud rate (default: 115200)
///   GECKOFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "geckoflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  geckoflash flash ncp-uart-sw.gbl\n  geckoflash -p /dev/ttyUSB0 flash --no-exit app.gbl\n  geckoflash list-ports --json")]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "GECKOFLASH_PORT")]
    port: Option<String>,

    /// Baud rate of the bootloader (default: 115200).
    #[arg(short, long, global = true, env = "GECKOFLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "GECKOFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Reboot into the bootloader, upload a firmware image and start it.
    Flash {
        /// Path to the firmware image (default: from config, else firmware.gbl).
        firmware: Option<PathBuf>,

        /// Stay in the bootloader after the upload.
        #[arg(long)]
        no_exit: bool,

        /// Attempts per XMODEM block before giving up.
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
        max_retries: Option<u32>,

        /// Seconds to wait for the bootloader menu.
        #[arg(long, value_name = "SECS")]
        prompt_timeout: Option<u64>,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Leave the bootloader and start the application.
    ExitBoot,
}

/// CLI-level failures with their exit codes.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Invalid usage or setup, e.g. no matching port (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// The operation ran and failed (exit code 1).
    #[error("{0}")]
    Failed(String),
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Failed(_)) | None => 1,
    }
}

/// Effective baud rate: command line, then config, then the bootloader default.
fn baud_rate(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.port.connection.baud)
        .unwrap_or(geckoflash::port::DEFAULT_BAUD)
}

/// Get serial port from CLI args, config or auto-detection.
fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };

    Ok(select_serial_port(&options, config)?.name)
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            firmware,
            no_exit,
            max_retries,
            prompt_timeout,
        } => commands::flash::cmd_flash(
            cli,
            &config,
            &commands::flash::FlashOptions {
                firmware: firmware
                    .clone()
                    .unwrap_or_else(|| config.firmware()),
                no_exit: *no_exit,
                max_retries: *max_retries,
                prompt_timeout: *prompt_timeout,
            },
        ),
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(&config, *json);
            Ok(())
        },
        Commands::ExitBoot => commands::boot::cmd_exit_boot(cli, &config),
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stdout_is_tty = console::Term::stdout().is_term();
    let stderr_is_tty = console::Term::stderr().is_term();
    STDOUT_IS_TTY.store(stdout_is_tty, Ordering::Relaxed);

    let no_color = env::var("NO_COLOR").is_ok();
    if no_color || !stdout_is_tty {
        console::set_colors_enabled(false);
    }
    if no_color || !stderr_is_tty {
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "geckoflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}
