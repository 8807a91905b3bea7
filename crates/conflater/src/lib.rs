//! Conflating device lister core
//!
//! This crate merges per-transport sightings of the same physical device into
//! one consolidated record, keyed by serial number. Transport backends (USB,
//! serial ports, debug-probe SDK) each report a list of [`DeviceFragment`]s
//! per enumeration round; the [`ConflationEngine`] merges them, deduplicates
//! repeat errors across rounds, and publishes the result both as a return
//! value and as a [`ListerEvent`] to subscribers.
//!
//! The crate is hardware-agnostic: backends implement the [`Backend`] trait
//! and hotplug notification sources implement [`HotplugMonitor`]. The
//! [`DeviceLister`] facade owns the backend list, the engine, and the
//! [`Throttle`] that coalesces bursty reenumeration triggers.
//!
//! # Example
//!
//! ```no_run
//! use conflater::{Backend, DeviceLister};
//! use std::sync::Arc;
//!
//! # async fn demo(backends: Vec<Arc<dyn Backend>>) -> conflater::Result<()> {
//! let lister = DeviceLister::new(backends, None);
//! let devices = lister.reenumerate().await?;
//! for (serial, device) in devices.iter() {
//!     println!("{serial}: {:?}", device.traits);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod engine;
pub mod error;
pub mod event;
pub mod fragment;
pub mod lister;
pub mod serial_key;
pub mod throttle;

pub use backend::{Backend, HotplugEvent, HotplugMonitor};
pub use engine::ConflationEngine;
pub use error::{Error, Result};
pub use event::ListerEvent;
pub use fragment::{ConsolidatedDevice, DeviceFragment, DeviceMap, DeviceTrait, ErrorInfo};
pub use lister::{Capabilities, DeviceLister};
pub use throttle::Throttle;
