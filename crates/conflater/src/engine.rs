//! Conflation engine
//!
//! Merges the fragments returned by all backends in one round into a single
//! consolidated device map, keyed by normalized serial number, and decides
//! which events to emit. Errors are deduplicated against the immediately
//! preceding round so a persistent fault is reported once, not on every
//! round of a long-running watch session.

use crate::error::{Error, Result};
use crate::event::ListerEvent;
use crate::fragment::{ConsolidatedDevice, DeviceFragment, DeviceMap};
use crate::serial_key;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Merges per-backend fragments into consolidated device records
///
/// The engine owns the current device map and the set of error sources seen
/// in the last completed round. Both are replaced wholesale at the end of a
/// round, never mutated in place, so snapshots handed to consumers stay
/// stable.
pub struct ConflationEngine {
    /// Snapshot of the last completed round
    current: Arc<DeviceMap>,
    /// Error sources seen in the last completed round, used for dedup
    previous_errors: HashSet<String>,
    /// Push delivery of round results
    events: broadcast::Sender<ListerEvent>,
}

impl ConflationEngine {
    pub fn new(events: broadcast::Sender<ListerEvent>) -> Self {
        Self {
            current: Arc::new(DeviceMap::new()),
            previous_errors: HashSet::new(),
            events,
        }
    }

    /// Consolidated map from the last completed round
    pub fn current(&self) -> Arc<DeviceMap> {
        Arc::clone(&self.current)
    }

    /// Merge one round's fragments, in backend-query order
    ///
    /// Returns the new consolidated map and publishes the same snapshot as a
    /// [`ListerEvent::Conflated`]. Error fragments become [`ListerEvent::Error`]
    /// unless the same source already errored in the previous round; devices
    /// without a serial number become [`ListerEvent::NoSerialNumber`].
    ///
    /// A malformed fragment fails the whole round before any event is
    /// emitted; the remembered error set is left untouched in that case.
    pub fn conflate(
        &mut self,
        fragments_by_backend: Vec<Vec<DeviceFragment>>,
    ) -> Result<Arc<DeviceMap>> {
        validate(&fragments_by_backend)?;

        let mut map = DeviceMap::new();
        let mut new_errors = HashSet::new();

        for fragments in &fragments_by_backend {
            for fragment in fragments {
                if let Some(error) = &fragment.error {
                    // Checked by validate() above.
                    let source = fragment
                        .error_source
                        .clone()
                        .ok_or_else(|| Error::invariant("error fragment without a source"))?;
                    if !self.previous_errors.contains(&source) {
                        debug!(%source, %error, "backend error");
                        self.emit(ListerEvent::Error {
                            source: source.clone(),
                            error: error.clone(),
                        });
                    } else {
                        trace!(%source, "suppressing repeated error");
                    }
                    new_errors.insert(source);
                } else if let Some(key) = fragment
                    .serial_number
                    .as_deref()
                    .and_then(serial_key::normalize)
                {
                    map.entry(key.clone())
                        .or_insert_with(|| ConsolidatedDevice::new(key))
                        .absorb(fragment);
                } else {
                    trace!(traits = ?fragment.traits, "device without serial number");
                    self.emit(ListerEvent::NoSerialNumber(fragment.clone()));
                }
            }
        }

        // Swap the error set only after the whole round has been processed;
        // mid-round lookups must see the previous round's set.
        self.previous_errors = new_errors;

        let map = Arc::new(map);
        self.current = Arc::clone(&map);
        debug!(devices = map.len(), "conflated");
        self.emit(ListerEvent::Conflated(Arc::clone(&map)));
        Ok(map)
    }

    fn emit(&self, event: ListerEvent) {
        // No subscribers is fine; the pull API still gets the return value.
        let _ = self.events.send(event);
    }
}

/// Reject malformed fragments before any state change or event emission
fn validate(fragments_by_backend: &[Vec<DeviceFragment>]) -> Result<()> {
    for fragments in fragments_by_backend {
        for fragment in fragments {
            if fragment.error.is_some() {
                if fragment.serial_number.is_some() {
                    return Err(Error::invariant(
                        "fragment carries both a serial number and an error",
                    ));
                }
                if fragment.error_source.is_none() {
                    return Err(Error::invariant("error fragment without a source"));
                }
            } else if fragment.error_source.is_some() {
                return Err(Error::invariant("error source without an error"));
            }
        }
    }
    Ok(())
}
