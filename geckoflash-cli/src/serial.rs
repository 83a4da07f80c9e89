//! Serial port selection.
//!
//! Ports are picked in this order:
//! - the port given on the command line,
//! - the port stored in the configuration,
//! - auto-detection: ports whose USB description matches one of the
//!   configured fragments, CP210x bridges and configured VID/PID pairs.
//!
//! A single candidate is used directly. Several candidates are offered in an
//! interactive list, or rejected in non-interactive mode.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    geckoflash::{DetectedPort, DeviceKind, PortInfo, detect_ports},
    log::{debug, info},
    std::io::IsTerminal,
};

/// Message used when auto-detection finds nothing.
pub const NO_MATCHING_DEVICE: &str = "No device with matching description found.";

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Check if a port looks like a flashing target.
pub fn is_target_port(port: &DetectedPort, config: &Config) -> bool {
    if port.matches_description(&config.match_descriptions()) || port.device == DeviceKind::Cp210x
    {
        return true;
    }

    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        return config
            .port
            .usb_device
            .iter()
            .any(|device| device.matches(vid, pid));
    }

    false
}

/// Filter `ports` down to flashing targets, keeping enumeration order.
pub fn target_candidates(ports: Vec<DetectedPort>, config: &Config) -> Vec<DetectedPort> {
    ports
        .into_iter()
        .filter(|p| is_target_port(p, config))
        .collect()
}

/// Select a serial port from CLI options, configuration or auto-detection.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<DetectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name));
    }

    if let Some(port_name) = &config.port.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name));
    }

    let candidates = target_candidates(detect_ports(), config);
    choose_candidate(candidates, options.non_interactive)
}

/// Pick one of the auto-detected candidates.
fn choose_candidate(mut candidates: Vec<DetectedPort>, non_interactive: bool) -> Result<DetectedPort> {
    match candidates.len() {
        0 => Err(usage_err(NO_MATCHING_DEVICE)),
        1 => {
            let port = candidates.remove(0);
            info!("Auto-selected port: {} - {}", port.name, port.description());
            Ok(port)
        },
        count if non_interactive => Err(usage_err(&format!(
            "Found {count} matching ports; select one with --port"
        ))),
        _ => {
            ensure_interactive_terminal()?;
            select_port_interactive(candidates)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Multiple matching ports found and no terminal to choose from; use --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            CliError::Failed(format!("Port selection failed: {io_err}")).into()
        },
    }
}

/// Find a port by name, keeping the name even if enumeration misses it.
fn find_port_by_name(name: &str) -> DetectedPort {
    let ports = detect_ports();

    ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)))
        .cloned()
        .unwrap_or_else(|| {
            DetectedPort::from(PortInfo {
                name: name.to_string(),
                ..PortInfo::default()
            })
        })
}

/// Label shown for a port in the selection list.
fn port_label(port: &DetectedPort) -> String {
    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else {
        String::new()
    };

    format!(
        "{}{} - {}",
        style(&port.name).bold(),
        device_info,
        style(port.description()).dim()
    )
}

/// Interactive port selection.
fn select_port_interactive(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    eprintln!(
        "{} Found {} matching serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    // Truncate labels to fit terminal width to prevent wrapping in narrow
    // terminals.
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(port_label)
        .map(|n| console::truncate_str(&n, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the serial port of the device")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Failed("Port selection cancelled".to_string()).into()),
    }
}
