//! Device fragment and consolidated device types
//!
//! A [`DeviceFragment`] is one backend's report about one device (or one
//! failure) for one enumeration round. Fragments sharing a serial number are
//! merged into a [`ConsolidatedDevice`] by the conflation engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Capability tag contributed by a backend
///
/// Each trait doubles as the namespace under which the contributing backend
/// stores its payload in [`DeviceFragment::backend_data`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum DeviceTrait {
    /// Any device reachable through libusb
    #[serde(rename = "usb")]
    Usb,
    /// USB device with the Nordic Semiconductor vendor ID
    #[serde(rename = "nordicUsb")]
    NordicUsb,
    /// Nordic USB device exposing a DFU trigger interface
    #[serde(rename = "nordicDfu")]
    NordicDfu,
    /// USB device with the Segger vendor ID
    #[serde(rename = "seggerUsb")]
    SeggerUsb,
    /// Serial port (including USB CDC ACMs)
    #[serde(rename = "serialport")]
    SerialPort,
    /// J-Link debug probe reported by the vendor SDK
    #[serde(rename = "jlink")]
    Jlink,
}

impl DeviceTrait {
    /// Namespace key used for this trait's backend data
    pub fn namespace(self) -> &'static str {
        match self {
            DeviceTrait::Usb => "usb",
            DeviceTrait::NordicUsb => "nordicUsb",
            DeviceTrait::NordicDfu => "nordicDfu",
            DeviceTrait::SeggerUsb => "seggerUsb",
            DeviceTrait::SerialPort => "serialport",
            DeviceTrait::Jlink => "jlink",
        }
    }
}

impl fmt::Display for DeviceTrait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Description of a backend or per-device failure
///
/// Carried inside error fragments and re-emitted through
/// [`ListerEvent::Error`](crate::ListerEvent::Error).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Human-readable description of what went wrong
    pub message: String,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// One backend's view of one physical device for one enumeration round
///
/// A fragment is either a device observation (`serial_number` present or
/// knowably absent, `error` absent) or an error observation (`error` and
/// `error_source` present). A fragment carrying both device data and an
/// error violates the backend contract and fails the whole round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFragment {
    /// Serial number as reported by the backend, if it could determine one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Capability tags this backend contributes
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub traits: BTreeSet<DeviceTrait>,
    /// Backend-specific payload, keyed by trait namespace
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub backend_data: BTreeMap<String, Value>,
    /// Failure description, mutually exclusive with device data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Stable identifier for what failed, required alongside `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_source: Option<String>,
}

impl DeviceFragment {
    /// Device observation with a known serial number
    pub fn device(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: Some(serial_number.into()),
            ..Self::default()
        }
    }

    /// Device observation for a device whose serial number could not be read
    pub fn no_serial() -> Self {
        Self::default()
    }

    /// Error observation attributed to a stable source identifier
    pub fn error(source: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            error: Some(error),
            error_source: Some(source.into()),
            ..Self::default()
        }
    }

    /// Add a capability tag
    pub fn with_trait(mut self, device_trait: DeviceTrait) -> Self {
        self.traits.insert(device_trait);
        self
    }

    /// Attach a backend payload under the given namespace
    pub fn with_data(mut self, namespace: impl Into<String>, data: Value) -> Self {
        self.backend_data.insert(namespace.into(), data);
        self
    }
}

/// Merged record for one physical device, keyed by normalized serial number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedDevice {
    /// Normalized serial number (duplicated from the map key)
    pub serial_number: String,
    /// Union of the traits contributed by all fragments for this device
    pub traits: BTreeSet<DeviceTrait>,
    /// Union of all backends' payload namespaces
    pub backend_data: BTreeMap<String, Value>,
}

impl ConsolidatedDevice {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            traits: BTreeSet::new(),
            backend_data: BTreeMap::new(),
        }
    }

    /// Merge a fragment's traits and backend data into this record
    ///
    /// Additive: distinct namespaces accumulate; a conflict on the same
    /// namespace is last-writer-wins in backend-query order.
    pub fn absorb(&mut self, fragment: &DeviceFragment) {
        self.traits.extend(fragment.traits.iter().copied());
        for (namespace, data) in &fragment.backend_data {
            self.backend_data.insert(namespace.clone(), data.clone());
        }
    }

    /// Board version contributed by any backend, if one was looked up
    pub fn board_version(&self) -> Option<&str> {
        self.backend_data
            .values()
            .find_map(|data| data.get("boardVersion").and_then(Value::as_str))
    }
}

/// Consolidated device mapping for one completed round
///
/// Published as an `Arc` snapshot; a snapshot is never mutated after its
/// round completes.
pub type DeviceMap = BTreeMap<String, ConsolidatedDevice>;
