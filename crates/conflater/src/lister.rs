//! Device lister facade
//!
//! Owns the backend list, the conflation engine and the public event
//! surface. Supports one-shot pull-based enumeration (`reenumerate`) and a
//! continuous watch mode (`start`/`stop`) where hardware attach/detach
//! notifications drive throttled reenumeration rounds.

use crate::backend::{Backend, HotplugEvent, HotplugMonitor};
use crate::engine::ConflationEngine;
use crate::error::Result;
use crate::event::ListerEvent;
use crate::fragment::DeviceMap;
use crate::throttle::Throttle;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// Requested device capabilities, used to select backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Any device reachable through libusb
    pub usb: bool,
    /// USB devices with the Nordic Semiconductor vendor ID
    pub nordic_usb: bool,
    /// Nordic USB devices exposing a DFU trigger interface
    pub nordic_dfu: bool,
    /// USB devices with the Segger vendor ID
    pub segger_usb: bool,
    /// Serial ports (including USB CDC ACMs)
    pub serialport: bool,
    /// J-Link debug probes reported by the vendor SDK
    pub jlink: bool,
}

impl Capabilities {
    /// Whether any capability was requested at all
    pub fn any(&self) -> bool {
        self.usb
            || self.nordic_usb
            || self.nordic_dfu
            || self.segger_usb
            || self.serialport
            || self.jlink
    }
}

/// Watch-mode machinery, present while listening for hardware changes
struct Watch {
    throttle: Arc<Throttle>,
    pump: Option<JoinHandle<()>>,
}

struct Inner {
    /// Backends in query order; fragment processing follows this order
    backends: Vec<Arc<dyn Backend>>,
    monitor: Option<Box<dyn HotplugMonitor>>,
    /// Serializes rounds; guarantees the error-dedup set always comes from
    /// the immediately preceding completed round
    engine: tokio::sync::Mutex<ConflationEngine>,
    events: broadcast::Sender<ListerEvent>,
    watch: Mutex<Option<Watch>>,
}

/// Conflating device lister
///
/// Cheaply cloneable handle; all clones share one engine and event surface,
/// so explicit `reenumerate` calls and watch-driven rounds never disagree.
#[derive(Clone)]
pub struct DeviceLister {
    inner: Arc<Inner>,
}

impl DeviceLister {
    /// Create a lister over the given backends, queried in list order
    ///
    /// Without a hotplug monitor, `start()` still performs the initial
    /// enumeration but no hardware events will trigger further rounds.
    pub fn new(
        backends: Vec<Arc<dyn Backend>>,
        monitor: Option<Box<dyn HotplugMonitor>>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let engine = tokio::sync::Mutex::new(ConflationEngine::new(events.clone()));
        Self {
            inner: Arc::new(Inner {
                backends,
                monitor,
                engine,
                events,
                watch: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to the push event surface
    pub fn subscribe(&self) -> broadcast::Receiver<ListerEvent> {
        self.inner.events.subscribe()
    }

    /// Consolidated map from the last completed round
    pub async fn current_devices(&self) -> Arc<DeviceMap> {
        self.inner.engine.lock().await.current()
    }

    /// Perform one full enumeration round
    ///
    /// Fans out to every backend concurrently, waits for all of them to
    /// settle (a hung backend hangs the round; backends are expected to
    /// impose their own timeouts), then conflates. Safe to call while watch
    /// mode is running; rounds are serialized on the engine lock.
    pub async fn reenumerate(&self) -> Result<Arc<DeviceMap>> {
        let mut engine = self.inner.engine.lock().await;
        debug!(backends = self.inner.backends.len(), "reenumerating");
        let pending: Vec<_> = self
            .inner
            .backends
            .iter()
            .map(|backend| backend.reenumerate())
            .collect();
        let fragments_by_backend = join_all(pending).await;
        engine.conflate(fragments_by_backend)
    }

    /// Begin listening for hardware attach/detach events
    ///
    /// Binds notifications to the reenumeration throttle and triggers one
    /// initial round. Calling `start` while already watching is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut watch = self.inner.watch.lock().expect("watch lock poisoned");
        if watch.is_some() {
            trace!("already watching");
            return Ok(());
        }

        for backend in &self.inner.backends {
            backend.start();
        }

        let throttle = Arc::new(Throttle::new({
            let lister = self.clone();
            move || {
                let lister = lister.clone();
                async move {
                    if let Err(err) = lister.reenumerate().await {
                        error!("enumeration round failed: {err}");
                    }
                }
            }
        }));

        let pump = match &self.inner.monitor {
            Some(monitor) => {
                let events = match monitor.start() {
                    Ok(events) => events,
                    Err(err) => {
                        for backend in &self.inner.backends {
                            backend.stop();
                        }
                        return Err(err);
                    }
                };
                let backends = self.inner.backends.clone();
                let throttle = Arc::clone(&throttle);
                Some(tokio::spawn(async move {
                    while let Ok(event) = events.recv().await {
                        trace!(?event, "hardware event");
                        if let HotplugEvent::Detached { bus, address } = event {
                            for backend in &backends {
                                backend.device_detached(bus, address);
                            }
                        }
                        if !throttle.trigger() {
                            trace!("reenumeration already pending, dropping trigger");
                        }
                    }
                    trace!("hotplug event stream closed");
                }))
            }
            None => None,
        };

        // Initial enumeration goes through the throttle too, so an attach
        // burst racing with startup still collapses into bounded rounds.
        throttle.trigger();

        *watch = Some(Watch { throttle, pump });
        debug!("started listening for hardware events");
        Ok(())
    }

    /// Stop listening for hardware attach/detach events
    ///
    /// An in-flight enumeration round is not cancelled; it runs to
    /// completion before the worker winds down. Monitors that run an OS
    /// thread join it here, so this call can block for up to one of the
    /// monitor's event-loop ticks.
    pub fn stop(&self) {
        let Some(watch) = self.inner.watch.lock().expect("watch lock poisoned").take() else {
            return;
        };
        if let Some(monitor) = &self.inner.monitor {
            monitor.stop();
        }
        watch.throttle.stop();
        if let Some(pump) = watch.pump {
            pump.abort();
        }
        for backend in &self.inner.backends {
            backend.stop();
        }
        debug!("stopped listening for hardware events");
    }
}
