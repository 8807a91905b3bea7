//! libusb hotplug monitor
//!
//! Runs libusb's event loop on a dedicated thread and forwards attach and
//! detach callbacks into an async channel. Platforms without hotplug
//! support (notably Windows' libusb build) are reported at `start` time so
//! callers can fall back to one-shot enumeration.

use conflater::{Error, HotplugEvent, HotplugMonitor, Result};
use rusb::{Context, Device, HotplugBuilder, UsbContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

const EVENT_LOOP_TICK: Duration = Duration::from_millis(100);

struct MonitorThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Hotplug monitor backed by libusb callbacks
#[derive(Default)]
pub struct RusbHotplugMonitor {
    state: Mutex<Option<MonitorThread>>,
}

impl RusbHotplugMonitor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HotplugMonitor for RusbHotplugMonitor {
    fn start(&self) -> Result<async_channel::Receiver<HotplugEvent>> {
        let mut state = self.state.lock().expect("monitor state poisoned");
        if state.is_some() {
            return Err(Error::Hotplug("monitor already running".into()));
        }
        if !rusb::has_hotplug() {
            return Err(Error::Hotplug(
                "libusb on this platform has no hotplug support".into(),
            ));
        }

        let (tx, rx) = async_channel::bounded(64);
        let stop = Arc::new(AtomicBool::new(false));
        let handle = std::thread::Builder::new()
            .name("usb-hotplug".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || {
                    if let Err(err) = event_loop(tx, &stop) {
                        warn!("hotplug event loop failed: {err}");
                    }
                }
            })
            .map_err(|err| Error::Hotplug(format!("cannot spawn hotplug thread: {err}")))?;

        *state = Some(MonitorThread { stop, handle });
        debug!("hotplug monitor started");
        Ok(rx)
    }

    /// Stop the event loop and join its thread
    ///
    /// Blocks the caller for up to one event-loop tick while the thread
    /// notices the stop flag.
    fn stop(&self) {
        let Some(thread) = self.state.lock().expect("monitor state poisoned").take() else {
            return;
        };
        thread.stop.store(true, Ordering::SeqCst);
        if thread.handle.join().is_err() {
            warn!("hotplug thread panicked");
        }
        debug!("hotplug monitor stopped");
    }
}

struct Callback {
    tx: async_channel::Sender<HotplugEvent>,
}

impl Callback {
    fn send(&self, event: HotplugEvent) {
        // A full channel means the consumer is far behind; the pending
        // trigger already covers these devices, so dropping is safe.
        if self.tx.try_send(event).is_err() {
            trace!("dropping hotplug event, channel full or closed");
        }
    }
}

impl rusb::Hotplug<Context> for Callback {
    fn device_arrived(&mut self, device: Device<Context>) {
        trace!(bus = device.bus_number(), address = device.address(), "attached");
        self.send(HotplugEvent::Attached {
            bus: device.bus_number(),
            address: device.address(),
        });
    }

    fn device_left(&mut self, device: Device<Context>) {
        trace!(bus = device.bus_number(), address = device.address(), "detached");
        self.send(HotplugEvent::Detached {
            bus: device.bus_number(),
            address: device.address(),
        });
    }
}

fn event_loop(tx: async_channel::Sender<HotplugEvent>, stop: &AtomicBool) -> rusb::Result<()> {
    let context = Context::new()?;
    let registration = HotplugBuilder::new()
        .enumerate(false)
        .register(&context, Box::new(Callback { tx }))?;

    while !stop.load(Ordering::SeqCst) {
        match context.handle_events(Some(EVENT_LOOP_TICK)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => debug!("event handling interrupted"),
            Err(err) => {
                warn!("error handling libusb events: {err}");
                std::thread::sleep(EVENT_LOOP_TICK);
            }
        }
    }

    drop(registration);
    Ok(())
}
