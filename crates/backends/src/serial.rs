//! Serial port backend
//!
//! Lists serial ports through the serialport crate and reports the ones
//! backed by a USB device. Ports without USB metadata (legacy UARTs, PCI
//! ports, Bluetooth SPP) carry no serial number and cannot take part in
//! conflation, so they are skipped.

use crate::usb::hexpad4;
use async_trait::async_trait;
use conflater::{Backend, DeviceFragment, DeviceTrait, ErrorInfo};
use serde_json::json;
use serialport::{SerialPortInfo, SerialPortType};
use tracing::{debug, trace};

/// Serial port transport backend
#[derive(Default)]
pub struct SerialPortBackend;

impl SerialPortBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for SerialPortBackend {
    fn name(&self) -> &'static str {
        "serialport"
    }

    async fn reenumerate(&self) -> Vec<DeviceFragment> {
        debug!("reenumerating serial ports");
        match tokio::task::spawn_blocking(serialport::available_ports).await {
            Ok(Ok(ports)) => ports.iter().filter_map(port_fragment).collect(),
            Ok(Err(err)) => vec![DeviceFragment::error(
                "serialport",
                ErrorInfo::new(format!("cannot list serial ports: {err}")),
            )],
            Err(err) => vec![DeviceFragment::error(
                "serialport",
                ErrorInfo::new(format!("serial port listing task failed: {err}")),
            )],
        }
    }
}

fn port_fragment(port: &SerialPortInfo) -> Option<DeviceFragment> {
    let SerialPortType::UsbPort(usb) = &port.port_type else {
        trace!(path = %port.port_name, "skipping non-USB serial port");
        return None;
    };

    let payload = json!({
        "path": port.port_name,
        "vendorId": hexpad4(usb.vid),
        "productId": hexpad4(usb.pid),
        "manufacturer": usb.manufacturer,
        "product": usb.product,
        "serialNumber": usb.serial_number,
    });

    let fragment = match &usb.serial_number {
        Some(serial) if !serial.is_empty() => DeviceFragment::device(serial.clone()),
        _ => DeviceFragment::no_serial(),
    };
    Some(
        fragment
            .with_trait(DeviceTrait::SerialPort)
            .with_data(DeviceTrait::SerialPort.namespace(), payload),
    )
}
