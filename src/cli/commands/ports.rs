//! `ports` command: list serial ports and how each would be classified.

use crate::cli::args::{OutputFormat, PortsArgs};
use crate::device::{Platform, classify, discover_ports};
use crate::error::FlasherError;

/// List discovered serial ports.
///
/// # Errors
///
/// Returns a channel error if the OS port list cannot be read.
pub fn run(args: &PortsArgs) -> Result<(), FlasherError> {
    let ports = discover_ports()?;

    match args.format {
        OutputFormat::Json => {
            let entries: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.name,
                        "vid": p.vid,
                        "pid": p.pid,
                        "description": p.description,
                        "platform": classify(p),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Human => {
            if ports.is_empty() {
                println!("No serial ports found.");
                return Ok(());
            }

            println!("Serial Ports ({} found)\n", ports.len());
            println!("  {:<24}{:<10}{:<11}DESCRIPTION", "PORT", "PLATFORM", "VID:PID");
            for port in &ports {
                let ids = match (port.vid, port.pid) {
                    (Some(vid), Some(pid)) => format!("{vid:04x}:{pid:04x}"),
                    _ => "-".to_owned(),
                };
                println!(
                    "  {:<24}{:<10}{ids:<11}{}",
                    port.name,
                    classify(port).as_str(),
                    port.description
                );
            }

            let usable = ports.iter().filter(|p| classify(p) != Platform::Unknown).count();
            println!();
            if usable == 0 {
                println!("No supported boards detected. Use 'flasher run --port <name>' to connect anyway.");
            } else {
                println!("{usable} supported board(s). 'flasher run' connects to the first one.");
            }
        }
    }

    Ok(())
}
