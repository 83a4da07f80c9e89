//! List-ports command implementation.

use console::style;
use geckoflash::{DetectedPort, detect_ports, format_port_list};

use crate::config::Config;
use crate::serial::{NO_MATCHING_DEVICE, is_target_port, target_candidates};

/// JSON view of one port.
fn port_json(port: &DetectedPort, config: &Config) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "description": port.description(),
        "device": port.device.name(),
        "target": is_target_port(port, config),
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial,
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(config: &Config, json: bool) {
    let detected = detect_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(|p| port_json(p, config))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return;
    }

    println!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        println!("  {}", style("No serial ports found").dim());
        return;
    }

    for (line, port) in format_port_list(&detected).iter().zip(&detected) {
        if is_target_port(port, config) {
            println!("  {}", style(line).cyan());
        } else {
            println!("  {line}");
        }
    }

    let candidates = target_candidates(detected, config);
    match candidates.as_slice() {
        [] => println!("\n{}", style(NO_MATCHING_DEVICE).dim()),
        [port] => println!(
            "\n{} Auto-selected: {}",
            style("→").green().bold(),
            style(&port.name).cyan().bold()
        ),
        ports => println!(
            "\n{} {} matching ports; choose one with --port",
            style("→").yellow().bold(),
            ports.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geckoflash::PortInfo;

    #[test]
    fn test_port_json_fields() {
        let port = DetectedPort::from(PortInfo {
            name: "/dev/ttyUSB0".to_string(),
            vid: Some(0x10C4),
            pid: Some(0xEA60),
            manufacturer: Some("Silicon Labs".to_string()),
            product: Some("CP2102N".to_string()),
            serial_number: Some("0001".to_string()),
        });

        let value = port_json(&port, &Config::default());

        assert_eq!(value["name"], "/dev/ttyUSB0");
        assert_eq!(value["description"], "Silicon Labs CP2102N");
        assert_eq!(value["device"], "CP210x");
        assert_eq!(value["target"], true);
        assert_eq!(value["vid"], 0x10C4);
        assert_eq!(value["serial"], "0001");
    }
}
