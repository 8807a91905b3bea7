//! USB backend
//!
//! Enumerates libusb-visible devices and reports one fragment per device
//! matching at least one configured filter. One backend instance carries
//! all requested USB filters, so a device shared by several capability
//! requests (say, generic USB and a Nordic vendor filter) is opened once
//! per round and tagged with every matching trait.
//!
//! Opening a device and reading its string descriptors issues blocking
//! control transfers that are unsafe to run concurrently at the driver
//! level, so the open/read/close sequence is serialized by a single lock
//! and the results are cached per bus address between rounds. A detach
//! notification invalidates the cache entry for that address.

pub mod hotplug;

use async_trait::async_trait;
use conflater::{Backend, DeviceFragment, DeviceTrait, ErrorInfo};
use rusb::{Context, Device, DeviceDescriptor, UsbContext};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Interface class triple a device must expose to match a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceFilter {
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
}

impl InterfaceFilter {
    pub fn matches(&self, class: u8, sub_class: u8, protocol: u8) -> bool {
        self.class == class && self.sub_class == sub_class && self.protocol == protocol
    }
}

/// One named filter checked against every enumerated device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbFilter {
    /// Trait tagged onto devices matching this filter
    pub device_trait: DeviceTrait,
    /// Restrict to one vendor ID; `None` matches every device
    pub vendor_id: Option<u16>,
    /// Additionally require an interface with this class triple
    pub interface: Option<InterfaceFilter>,
}

impl UsbFilter {
    /// Match every libusb-visible device
    pub fn generic() -> Self {
        Self {
            device_trait: DeviceTrait::Usb,
            vendor_id: None,
            interface: None,
        }
    }

    /// Match devices with the given vendor ID
    pub fn vendor(device_trait: DeviceTrait, vendor_id: u16) -> Self {
        Self {
            device_trait,
            vendor_id: Some(vendor_id),
            interface: None,
        }
    }

    /// Match devices with the given vendor ID exposing a specific interface
    pub fn vendor_with_interface(
        device_trait: DeviceTrait,
        vendor_id: u16,
        interface: InterfaceFilter,
    ) -> Self {
        Self {
            device_trait,
            vendor_id: Some(vendor_id),
            interface: Some(interface),
        }
    }

    fn vendor_matches(&self, vendor_id: u16) -> bool {
        self.vendor_id.is_none_or(|vid| vid == vendor_id)
    }
}

/// String descriptors cached between rounds
#[derive(Debug, Clone)]
struct DeviceStrings {
    serial_number: Option<String>,
    manufacturer: Option<String>,
    product: Option<String>,
}

type StringCache = HashMap<(u8, u8), DeviceStrings>;

/// USB transport backend
pub struct UsbBackend {
    filters: Vec<UsbFilter>,
    /// Serializes the open/read-descriptors/close sequence
    open_lock: Arc<Mutex<()>>,
    cache: Arc<Mutex<StringCache>>,
}

impl UsbBackend {
    pub fn new(filters: Vec<UsbFilter>) -> Self {
        Self {
            filters,
            open_lock: Arc::new(Mutex::new(())),
            cache: Arc::new(Mutex::new(StringCache::new())),
        }
    }
}

#[async_trait]
impl Backend for UsbBackend {
    fn name(&self) -> &'static str {
        "usb"
    }

    fn stop(&self) {
        self.cache.lock().expect("cache lock poisoned").clear();
    }

    fn device_detached(&self, bus: u8, address: u8) {
        if self
            .cache
            .lock()
            .expect("cache lock poisoned")
            .remove(&(bus, address))
            .is_some()
        {
            trace!(bus, address, "invalidated cached descriptors");
        }
    }

    async fn reenumerate(&self) -> Vec<DeviceFragment> {
        let filters = self.filters.clone();
        let open_lock = Arc::clone(&self.open_lock);
        let cache = Arc::clone(&self.cache);
        match tokio::task::spawn_blocking(move || enumerate(&filters, &open_lock, &cache)).await {
            Ok(fragments) => fragments,
            Err(err) => vec![DeviceFragment::error(
                "usb",
                ErrorInfo::new(format!("USB enumeration task failed: {err}")),
            )],
        }
    }
}

/// Prefix a number with 0x and pad to 4 hex digits
pub(crate) fn hexpad4(number: u16) -> String {
    format!("0x{number:04x}")
}

/// Stable identifier for a device, used as a per-device error source
fn device_id(device: &Device<Context>, descriptor: &DeviceDescriptor) -> String {
    format!(
        "{}.{} {}/{}",
        device.bus_number(),
        device.address(),
        hexpad4(descriptor.vendor_id()),
        hexpad4(descriptor.product_id()),
    )
}

fn enumerate(
    filters: &[UsbFilter],
    open_lock: &Mutex<()>,
    cache: &Mutex<StringCache>,
) -> Vec<DeviceFragment> {
    debug!("reenumerating USB devices");
    let devices = match Context::new().and_then(|context| context.devices()) {
        Ok(devices) => devices,
        Err(err) => {
            warn!("cannot enumerate USB devices: {err}");
            return vec![DeviceFragment::error(
                "usb",
                ErrorInfo::new(format!("cannot enumerate USB devices: {err}")),
            )];
        }
    };

    let mut fragments = Vec::new();
    for device in devices.iter() {
        match probe_device(&device, filters, open_lock, cache) {
            Ok(Some(fragment)) => fragments.push(fragment),
            Ok(None) => {}
            Err((source, err)) => {
                debug!(%source, "error probing USB device: {err}");
                fragments.push(DeviceFragment::error(source, ErrorInfo::new(err.to_string())));
            }
        }
    }
    fragments
}

/// Check one device against all filters and build its fragment
///
/// Returns `Ok(None)` when no filter matches; an inaccessible device yields
/// a per-device error keyed by its bus address and VID/PID.
fn probe_device(
    device: &Device<Context>,
    filters: &[UsbFilter],
    open_lock: &Mutex<()>,
    cache: &Mutex<StringCache>,
) -> Result<Option<DeviceFragment>, (String, rusb::Error)> {
    let descriptor = device
        .device_descriptor()
        .map_err(|err| (format!("{}.{}", device.bus_number(), device.address()), err))?;
    let source = device_id(device, &descriptor);

    let mut matched = Vec::new();
    for filter in filters {
        if !filter.vendor_matches(descriptor.vendor_id()) {
            continue;
        }
        if let Some(interface) = filter.interface {
            let found = has_matching_interface(device, descriptor.num_configurations(), interface)
                .map_err(|err| (source.clone(), err))?;
            if !found {
                continue;
            }
        }
        matched.push(filter.device_trait);
    }
    if matched.is_empty() {
        return Ok(None);
    }

    let strings =
        read_strings(device, &descriptor, open_lock, cache).map_err(|err| (source.clone(), err))?;
    trace!(
        %source,
        serial = ?strings.serial_number,
        product = ?strings.product,
        "enumerated"
    );

    let payload = json!({
        "serialNumber": strings.serial_number,
        "manufacturer": strings.manufacturer,
        "product": strings.product,
        "busNumber": device.bus_number(),
        "deviceAddress": device.address(),
        "vendorId": hexpad4(descriptor.vendor_id()),
        "productId": hexpad4(descriptor.product_id()),
    });

    let mut fragment = match &strings.serial_number {
        Some(serial) if !serial.is_empty() => DeviceFragment::device(serial.clone()),
        _ => DeviceFragment::no_serial(),
    };
    for device_trait in matched {
        fragment = fragment
            .with_trait(device_trait)
            .with_data(device_trait.namespace(), payload.clone());
    }
    Ok(Some(fragment))
}

/// Whether any configuration exposes an interface matching the filter
fn has_matching_interface(
    device: &Device<Context>,
    num_configurations: u8,
    filter: InterfaceFilter,
) -> rusb::Result<bool> {
    for index in 0..num_configurations {
        let config = device.config_descriptor(index)?;
        for interface in config.interfaces() {
            for descriptor in interface.descriptors() {
                if filter.matches(
                    descriptor.class_code(),
                    descriptor.sub_class_code(),
                    descriptor.protocol_code(),
                ) {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// Read (or recall) a device's string descriptors
fn read_strings(
    device: &Device<Context>,
    descriptor: &DeviceDescriptor,
    open_lock: &Mutex<()>,
    cache: &Mutex<StringCache>,
) -> rusb::Result<DeviceStrings> {
    let key = (device.bus_number(), device.address());
    if let Some(strings) = cache.lock().expect("cache lock poisoned").get(&key) {
        return Ok(strings.clone());
    }

    // Concurrent opens produce sporadic driver-level errors; one device at
    // a time, and only for the open/read/close sequence.
    let _guard = open_lock.lock().expect("open lock poisoned");
    let handle = device.open()?;
    let strings = DeviceStrings {
        serial_number: read_string(&handle, descriptor.serial_number_string_index())?,
        manufacturer: read_string(&handle, descriptor.manufacturer_string_index())?,
        product: read_string(&handle, descriptor.product_string_index())?,
    };
    drop(handle);

    cache
        .lock()
        .expect("cache lock poisoned")
        .insert(key, strings.clone());
    Ok(strings)
}

fn read_string(
    handle: &rusb::DeviceHandle<Context>,
    index: Option<u8>,
) -> rusb::Result<Option<String>> {
    match index {
        Some(index) => handle.read_string_descriptor_ascii(index).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_filter_requires_the_full_triple() {
        let filter = InterfaceFilter {
            class: 255,
            sub_class: 1,
            protocol: 1,
        };
        assert!(filter.matches(255, 1, 1));
        assert!(!filter.matches(255, 1, 2));
        assert!(!filter.matches(10, 1, 1));
    }

    #[test]
    fn generic_filter_matches_any_vendor() {
        let filter = UsbFilter::generic();
        assert!(filter.vendor_matches(0x1915));
        assert!(filter.vendor_matches(0x0000));
    }

    #[test]
    fn vendor_filter_is_exact() {
        let filter = UsbFilter::vendor(DeviceTrait::NordicUsb, 0x1915);
        assert!(filter.vendor_matches(0x1915));
        assert!(!filter.vendor_matches(0x1366));
    }

    #[test]
    fn hexpad4_pads_to_four_digits() {
        assert_eq!(hexpad4(0x1915), "0x1915");
        assert_eq!(hexpad4(0x43), "0x0043");
        assert_eq!(hexpad4(0), "0x0000");
    }
}
