//! device-lister
//!
//! Lists development kits and dongles attached to this machine, conflating
//! what the USB, serial port and debug probe transports each see of a
//! device into one record per serial number.

mod config;
mod logging;

use anyhow::{Context, Result};
use backends::BackendOptions;
use clap::Parser;
use conflater::{Capabilities, ConsolidatedDevice, DeviceLister, DeviceMap, ListerEvent, serial_key};
use logging::setup_logging;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "device-lister")]
#[command(author, version, about = "List devices across USB, serial port and debug probe transports")]
#[command(long_about = "
Lists devices attached to this machine. Each transport is queried
separately and the sightings are conflated by serial number, so a
development kit visible as a USB device, two serial ports and a J-Link
probe shows up as one record carrying all of those traits.

EXAMPLES:
    # One-shot listing of USB devices and serial ports
    device-lister --usb --serialport

    # Everything, as JSON
    device-lister --all --json

    # Keep watching for attach/detach and reprint on every change
    device-lister --all --watch

    # Look up one device by serial number
    device-lister --all --find-by-sn 683011234

CONFIGURATION:
    The lister looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/device-lister/config.toml
    3. /etc/device-lister/config.toml
    4. Built-in defaults
")]
struct Args {
    /// List any device reachable through libusb
    #[arg(long)]
    usb: bool,

    /// List USB devices with the Nordic Semiconductor vendor ID
    #[arg(long)]
    nordic_usb: bool,

    /// List Nordic USB devices exposing a DFU trigger interface
    #[arg(long)]
    nordic_dfu: bool,

    /// List USB devices with the Segger vendor ID
    #[arg(long)]
    segger_usb: bool,

    /// List serial ports backed by a USB device
    #[arg(long)]
    serialport: bool,

    /// List J-Link debug probes
    #[arg(long)]
    jlink: bool,

    /// Shorthand for enabling every transport
    #[arg(long)]
    all: bool,

    /// Keep running and reprint the device list on hardware changes
    #[arg(short, long)]
    watch: bool,

    /// Print only the device with this serial number
    #[arg(long, value_name = "SERIAL")]
    find_by_sn: Option<String>,

    /// Print machine-readable JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Program invoked to list debug-probe serial numbers
    #[arg(long, value_name = "PROGRAM")]
    nrfjprog: Option<String>,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn capabilities(&self) -> Capabilities {
        if self.all {
            return Capabilities {
                usb: true,
                nordic_usb: true,
                nordic_dfu: true,
                segger_usb: true,
                serialport: true,
                jlink: true,
            };
        }
        Capabilities {
            usb: self.usb,
            nordic_usb: self.nordic_usb,
            nordic_dfu: self.nordic_dfu,
            segger_usb: self.segger_usb,
            serialport: self.serialport,
            jlink: self.jlink,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = config::Config::default();
        let path = config::Config::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::Config::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        config::Config::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args.log_level.as_deref().unwrap_or(&config.lister.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    let capabilities = args.capabilities();
    if !capabilities.any() {
        warn!(
            "No transports selected, nothing will be listed; pass --usb, --serialport, --jlink, ... or --all"
        );
    }

    let options = BackendOptions {
        nrfjprog_program: args
            .nrfjprog
            .clone()
            .unwrap_or_else(|| config.jlink.program.clone()),
    };
    let lister = backends::build_lister(&capabilities, &options);

    if args.watch {
        run_watch(&lister, &args).await
    } else {
        run_once(&lister, &args).await
    }
}

/// One enumeration round, printed and done
async fn run_once(lister: &DeviceLister, args: &Args) -> Result<()> {
    let mut events = lister.subscribe();
    let devices = lister
        .reenumerate()
        .await
        .context("Enumeration round failed")?;
    report_side_events(&mut events);

    match &args.find_by_sn {
        Some(serial) => {
            let device = find_by_serial(&devices, serial)?;
            print_devices(std::slice::from_ref(device), args.json)?;
        }
        None => {
            let all: Vec<_> = devices.values().cloned().collect();
            print_devices(&all, args.json)?;
        }
    }
    Ok(())
}

/// Watch mode: reprint the full list on every completed round until Ctrl+C
async fn run_watch(lister: &DeviceLister, args: &Args) -> Result<()> {
    let mut events = lister.subscribe();
    lister.start().context("Failed to start watching")?;
    info!("Watching for hardware changes, press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ListerEvent::Conflated(devices)) => {
                    let all: Vec<_> = devices.values().cloned().collect();
                    print_devices(&all, args.json)?;
                }
                Ok(ListerEvent::Error { source, error }) => {
                    warn!(%source, "{error}");
                }
                Ok(ListerEvent::NoSerialNumber(fragment)) => {
                    debug!(?fragment, "device without a usable serial number");
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "event stream lagged, some rounds were skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    lister.stop();
    Ok(())
}

/// Surface errors and unidentifiable devices from a one-shot round
fn report_side_events(events: &mut broadcast::Receiver<ListerEvent>) {
    loop {
        match events.try_recv() {
            Ok(ListerEvent::Error { source, error }) => warn!(%source, "{error}"),
            Ok(ListerEvent::NoSerialNumber(fragment)) => {
                debug!(?fragment, "device without a usable serial number");
            }
            Ok(ListerEvent::Conflated(_)) => {}
            Err(TryRecvError::Lagged(missed)) => {
                warn!(missed, "event stream lagged, some reports were dropped");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => return,
        }
    }
}

fn find_by_serial<'a>(devices: &'a Arc<DeviceMap>, serial: &str) -> Result<&'a ConsolidatedDevice> {
    let key = serial_key::normalize(serial)
        .with_context(|| format!("'{serial}' is not a usable serial number"))?;
    devices
        .get(&key)
        .with_context(|| format!("No device with serial number {serial}"))
}

fn print_devices(devices: &[ConsolidatedDevice], json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(devices).context("Failed to encode devices as JSON")?
        );
        return Ok(());
    }

    if devices.is_empty() {
        println!("No devices found");
        return Ok(());
    }
    println!("{:<16} {:<10} TRAITS", "SERIAL", "BOARD");
    for device in devices {
        let traits: Vec<_> = device.traits.iter().map(ToString::to_string).collect();
        println!(
            "{:<16} {:<10} {}",
            device.serial_number,
            device.board_version().unwrap_or("-"),
            traits.join(", ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_flag_enables_every_transport() {
        let args = Args::parse_from(["device-lister", "--all"]);
        let capabilities = args.capabilities();
        assert!(capabilities.usb && capabilities.serialport && capabilities.jlink);
        assert!(capabilities.nordic_usb && capabilities.nordic_dfu && capabilities.segger_usb);
    }

    #[test]
    fn individual_flags_map_one_to_one() {
        let args = Args::parse_from(["device-lister", "--serialport", "--jlink"]);
        let capabilities = args.capabilities();
        assert!(capabilities.serialport && capabilities.jlink);
        assert!(!capabilities.usb && !capabilities.nordic_usb);
    }

    #[test]
    fn no_flags_means_no_capabilities() {
        let args = Args::parse_from(["device-lister"]);
        assert!(!args.capabilities().any());
    }

    #[test]
    fn side_event_drain_survives_a_lagged_stream() {
        let (tx, mut rx) = broadcast::channel(1);
        for i in 0..3 {
            tx.send(ListerEvent::Error {
                source: format!("usb-{i}"),
                error: conflater::ErrorInfo::new("boom"),
            })
            .unwrap();
        }

        // The receiver lagged past capacity; draining must step over the
        // lag marker and still consume the remaining events.
        report_side_events(&mut rx);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }
}
