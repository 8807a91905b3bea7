//! Backend and hotplug-monitor contracts
//!
//! A backend enumerates devices of one transport kind. The engine holds a
//! plain list of backend trait objects; no hierarchy beyond this single
//! capability contract is needed.

use crate::error::Result;
use crate::fragment::DeviceFragment;
use async_trait::async_trait;

/// A transport backend that can enumerate its devices
///
/// `reenumerate` must never fail as a call: a backend-wide failure becomes
/// a single error fragment carrying a backend-identifying source, and a
/// per-device failure becomes one error fragment per failing device, with
/// the remaining devices still reported normally.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable backend name, also used as the backend-wide error source
    fn name(&self) -> &'static str;

    /// Called when the lister starts listening for hardware changes
    fn start(&self) {}

    /// Called when the lister stops listening for hardware changes
    fn stop(&self) {}

    /// A device left the bus; invalidate any per-device caches for it
    fn device_detached(&self, _bus: u8, _address: u8) {}

    /// Enumerate all currently visible devices of this transport kind
    async fn reenumerate(&self) -> Vec<DeviceFragment>;
}

/// Hardware attach/detach notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugEvent {
    /// A device appeared on the bus
    Attached { bus: u8, address: u8 },
    /// A device left the bus
    Detached { bus: u8, address: u8 },
}

/// Source of attach/detach notifications driving watch mode
///
/// Implementations typically run a dedicated OS thread around a blocking
/// event loop and bridge notifications over the returned channel; the
/// channel closes when the monitor stops.
pub trait HotplugMonitor: Send + Sync {
    /// Begin listening; yields the notification stream
    fn start(&self) -> Result<async_channel::Receiver<HotplugEvent>>;

    /// Stop listening and close the notification stream
    fn stop(&self);
}
