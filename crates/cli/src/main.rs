//! usb-link
//!
//! Finds a USB peripheral with a vendor-specific interface, asks for
//! permission to use it, claims the interface and holds the connection
//! until the device is unplugged or Ctrl+C is pressed.

mod config;
mod console;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{DeviceDescriptor, DeviceId, setup_logging};
use config::{LinkConfig, PermissionMode};
use console::ConsolePrompt;
use host::{AllowAll, HostOptions, RusbHost, UsbFilter};
use manager::{ConnectionManager, ConnectionStatus, UsbHost};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-link")]
#[command(author, version, about = "Connect to a vendor-specific USB peripheral")]
#[command(long_about = "
Connects to one USB peripheral at a time: asks for permission, claims the
first vendor-specific interface and reports every connection state change.

EXAMPLES:
    # List candidate devices
    usb-link --list-devices

    # Connect by device node
    usb-link --connect /dev/bus/usb/001/004

    # Connect to the first device matching VID:PID
    usb-link --connect 0x2fe3:0x0100 --permission console

CONFIGURATION:
    usb-link looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-link/config.toml
    3. /etc/usb-link/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Device to connect to: device node or VID:PID
    #[arg(long, value_name = "DEVICE")]
    connect: Option<String>,

    /// How permission prompts are answered
    #[arg(long, value_enum)]
    permission: Option<PermissionMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = LinkConfig::default();
        let path = LinkConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        LinkConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        LinkConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-link v{}", env!("CARGO_PKG_VERSION"));

    let permission = args.permission.unwrap_or(config.usb.permission);
    let host = build_host(config.host_options()?, permission)?;
    let manager = ConnectionManager::new(host).context("Failed to start connection manager")?;

    let result = match args.connect.as_deref() {
        Some(target) if !args.list_devices => connect_mode(&manager, target).await,
        _ => list_devices_mode(&manager),
    };

    manager.release();
    result
}

fn build_host(options: HostOptions, permission: PermissionMode) -> Result<RusbHost> {
    let host = match permission {
        PermissionMode::AllowAll => RusbHost::new(options, AllowAll),
        PermissionMode::Probe => RusbHost::with_access_probe(options),
        PermissionMode::Console => RusbHost::new(options, ConsolePrompt::new()),
    };
    host.context("Failed to initialize libusb")
}

fn list_devices_mode(manager: &ConnectionManager<RusbHost>) -> Result<()> {
    let devices = manager.list().context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        println!("  {}  {}", device.id, device.label());
        for interface in &device.interfaces {
            println!(
                "      Interface {} alt {}: class {:#04x}{}",
                interface.number,
                interface.alternate_setting,
                interface.class_code,
                if interface.is_vendor_specific() {
                    " (vendor-specific)"
                } else {
                    ""
                }
            );
        }
        println!();
    }

    Ok(())
}

async fn connect_mode(manager: &ConnectionManager<RusbHost>, target: &str) -> Result<()> {
    let device = resolve_target(manager, target)?;

    // Subscribe before connecting so no transition is missed
    let mut transitions = manager.subscribe_transitions();
    let outcome = manager
        .connect(&device)
        .with_context(|| format!("Failed to connect to {}", device.id))?;
    info!("Connect to {}: {:?}", device.id, outcome);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting");
                manager.disconnect();
                return Ok(());
            }
            status = transitions.recv() => match status {
                Ok(status) => {
                    println!("{}", status);
                    match status {
                        ConnectionStatus::Error { error } => return Err(error.into()),
                        ConnectionStatus::Disconnected { .. } => return Ok(()),
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Missed {} status updates", n),
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

/// Pick the device named by a device node or a VID:PID filter
fn resolve_target<H: UsbHost>(
    manager: &ConnectionManager<H>,
    target: &str,
) -> Result<DeviceDescriptor> {
    let found = if target.starts_with('/') {
        manager
            .find(&DeviceId::new(target))
            .context("Failed to enumerate USB devices")?
    } else {
        let filter: UsbFilter = target
            .parse()
            .with_context(|| format!("'{}' is neither a device node nor VID:PID", target))?;
        manager
            .list()
            .context("Failed to enumerate USB devices")?
            .into_iter()
            .find(|d| filter.matches(d.vendor_id, d.product_id))
    };

    found.ok_or_else(|| anyhow!("No device matches '{}'", target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{create_hid_device, create_vendor_device};
    use manager::mock::MockHost;

    fn manager_with(devices: Vec<DeviceDescriptor>) -> ConnectionManager<MockHost> {
        ConnectionManager::new(MockHost::with_devices(devices)).unwrap()
    }

    #[test]
    fn test_resolve_by_node() {
        let devices = vec![create_vendor_device(1), create_vendor_device(2)];
        let manager = manager_with(devices.clone());
        let found = resolve_target(&manager, devices[1].id.as_str()).unwrap();
        assert_eq!(found.id, devices[1].id);
    }

    #[test]
    fn test_resolve_by_vid_pid() {
        let devices = vec![create_hid_device(1), create_vendor_device(2)];
        let manager = manager_with(devices.clone());
        let found = resolve_target(&manager, "0x2fe3:0x0102").unwrap();
        assert_eq!(found.id, devices[1].id);

        let first = resolve_target(&manager, "2fe3:*").unwrap();
        assert_eq!(first.id, devices[0].id);
    }

    #[test]
    fn test_resolve_failures() {
        let manager = manager_with(vec![create_vendor_device(1)]);
        assert!(resolve_target(&manager, "/dev/bus/usb/009/009").is_err());
        assert!(resolve_target(&manager, "0xdead:0xbeef").is_err());
        assert!(resolve_target(&manager, "widget").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "usb-link",
            "--connect",
            "0x2fe3:*",
            "--permission",
            "allow-all",
        ]);
        assert_eq!(args.connect.as_deref(), Some("0x2fe3:*"));
        assert_eq!(args.permission, Some(PermissionMode::AllowAll));
        assert!(!args.list_devices);
    }
}
