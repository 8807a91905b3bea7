//! Lister event surface
//!
//! Every conflation round publishes its outcome to subscribers through a
//! broadcast channel. The same data is also returned directly to the caller
//! that drove the round, so push and pull consumers can never disagree.

use crate::fragment::{DeviceFragment, DeviceMap, ErrorInfo};
use std::sync::Arc;

/// Event published by the conflation engine
#[derive(Debug, Clone)]
pub enum ListerEvent {
    /// A round completed; carries the full consolidated device map
    /// (level-triggered: always the current state, even when empty).
    Conflated(Arc<DeviceMap>),

    /// A backend or device failed this round and the same source did not
    /// fail in the immediately preceding round (edge-triggered).
    Error {
        /// Stable identifier for what failed
        source: String,
        /// The underlying failure description
        error: ErrorInfo,
    },

    /// A device was found but no serial number could be obtained for it.
    /// A policy signal, not an error.
    NoSerialNumber(DeviceFragment),
}
