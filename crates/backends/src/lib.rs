//! Transport backends for the conflating device lister
//!
//! One module per transport kind: generic and vendor-filtered USB through
//! libusb (rusb), serial ports through the serialport crate, and J-Link
//! debug probes through the vendor's `nrfjprog` command-line tool. The
//! [`build_lister`] factory turns a capability selection into a fully wired
//! [`DeviceLister`].

pub mod board_version;
pub mod jlink;
pub mod serial;
pub mod usb;

pub use jlink::JlinkBackend;
pub use serial::SerialPortBackend;
pub use usb::hotplug::RusbHotplugMonitor;
pub use usb::{InterfaceFilter, UsbBackend, UsbFilter};

use conflater::{Backend, Capabilities, DeviceLister, DeviceTrait};
use std::sync::Arc;

/// Nordic Semiconductor USB vendor ID
pub const NORDIC_VENDOR_ID: u16 = 0x1915;

/// Segger USB vendor ID
pub const SEGGER_VENDOR_ID: u16 = 0x1366;

/// Interface triple identifying the Nordic DFU trigger interface
pub const DFU_TRIGGER_INTERFACE: InterfaceFilter = InterfaceFilter {
    class: 255,
    sub_class: 1,
    protocol: 1,
};

/// Tunables for backend construction
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Program invoked to list debug-probe serial numbers
    pub nrfjprog_program: String,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            nrfjprog_program: JlinkBackend::DEFAULT_PROGRAM.to_string(),
        }
    }
}

/// USB filters implied by a capability selection
///
/// All USB-ish capabilities are consolidated into one backend instance with
/// multiple named filters, so each physical device is opened once per round
/// and checked against every filter.
fn usb_filters(capabilities: &Capabilities) -> Vec<UsbFilter> {
    let mut filters = Vec::new();
    if capabilities.usb {
        filters.push(UsbFilter::generic());
    }
    if capabilities.nordic_usb {
        filters.push(UsbFilter::vendor(DeviceTrait::NordicUsb, NORDIC_VENDOR_ID));
    }
    if capabilities.nordic_dfu {
        filters.push(UsbFilter::vendor_with_interface(
            DeviceTrait::NordicDfu,
            NORDIC_VENDOR_ID,
            DFU_TRIGGER_INTERFACE,
        ));
    }
    if capabilities.segger_usb {
        filters.push(UsbFilter::vendor(DeviceTrait::SeggerUsb, SEGGER_VENDOR_ID));
    }
    filters
}

/// Instantiate exactly the backends needed for the requested capabilities
///
/// Backend query order is fixed (USB, serial ports, probes) so fragment
/// processing order, and thus last-writer-wins tie-breaks, is deterministic.
pub fn build_lister(capabilities: &Capabilities, options: &BackendOptions) -> DeviceLister {
    let mut backends: Vec<Arc<dyn Backend>> = Vec::new();

    let filters = usb_filters(capabilities);
    if !filters.is_empty() {
        backends.push(Arc::new(UsbBackend::new(filters)));
    }
    if capabilities.serialport {
        backends.push(Arc::new(SerialPortBackend::new()));
    }
    if capabilities.jlink {
        backends.push(Arc::new(JlinkBackend::new(&options.nrfjprog_program)));
    }

    DeviceLister::new(backends, Some(Box::new(RusbHotplugMonitor::new())))
}
