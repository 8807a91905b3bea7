//! Integration tests for the lister facade
//!
//! Drives a [`DeviceLister`] with scripted in-memory backends and a mock
//! hotplug monitor, covering the cross-backend merge, the error event
//! surface, and the watch-mode lifecycle.

use async_trait::async_trait;
use conflater::{
    Backend, DeviceFragment, DeviceLister, DeviceTrait, ErrorInfo, HotplugEvent, HotplugMonitor,
    ListerEvent,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Backend returning the same fragments every round
struct ScriptedBackend {
    name: &'static str,
    fragments: Vec<DeviceFragment>,
    calls: AtomicUsize,
    started: AtomicBool,
    stopped: AtomicBool,
    detached: Mutex<Vec<(u8, u8)>>,
}

impl ScriptedBackend {
    fn new(name: &'static str, fragments: Vec<DeviceFragment>) -> Arc<Self> {
        Arc::new(Self {
            name,
            fragments,
            calls: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            detached: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn device_detached(&self, bus: u8, address: u8) {
        self.detached.lock().unwrap().push((bus, address));
    }

    async fn reenumerate(&self) -> Vec<DeviceFragment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.fragments.clone()
    }
}

/// Hotplug monitor fed by the test through an async channel
struct MockMonitor {
    events: async_channel::Receiver<HotplugEvent>,
    stopped: AtomicBool,
}

impl MockMonitor {
    fn new() -> (async_channel::Sender<HotplugEvent>, Box<Self>) {
        let (tx, rx) = async_channel::unbounded();
        (
            tx,
            Box::new(Self {
                events: rx,
                stopped: AtomicBool::new(false),
            }),
        )
    }
}

impl HotplugMonitor for MockMonitor {
    fn start(&self) -> conflater::Result<async_channel::Receiver<HotplugEvent>> {
        Ok(self.events.clone())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

fn drain(rx: &mut broadcast::Receiver<ListerEvent>) -> Vec<ListerEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return events,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
}

/// Poll until `cond` holds or the test times out
async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn usb_device(serial: &str, product: &str) -> DeviceFragment {
    DeviceFragment::device(serial)
        .with_trait(DeviceTrait::Usb)
        .with_data("usb", json!({ "product": product }))
}

#[tokio::test]
async fn failing_backend_does_not_block_healthy_one() {
    let jlink = ScriptedBackend::new(
        "jlink",
        vec![DeviceFragment::error(
            "jlink",
            ErrorInfo::new("cannot open DLL"),
        )],
    );
    let usb = ScriptedBackend::new(
        "usb",
        vec![usb_device("1234", "dongle"), usb_device("5678", "probe")],
    );

    let lister = DeviceLister::new(vec![jlink as Arc<dyn Backend>, usb as Arc<dyn Backend>], None);
    let mut events = lister.subscribe();

    let devices = lister.reenumerate().await.unwrap();
    assert_eq!(devices.len(), 2);
    assert!(devices.contains_key("1234"));
    assert!(devices.contains_key("5678"));

    let events = drain(&mut events);
    let errors: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            ListerEvent::Error { source, .. } => Some(source.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(errors, ["jlink"]);
    assert!(
        events
            .iter()
            .any(|event| matches!(event, ListerEvent::Conflated(_)))
    );
}

#[tokio::test]
async fn fragments_merge_across_backends_by_numeric_identity() {
    let usb = ScriptedBackend::new("usb", vec![usb_device("000680000001", "devkit")]);
    let jlink = ScriptedBackend::new(
        "jlink",
        vec![
            DeviceFragment::device("680000001")
                .with_trait(DeviceTrait::Jlink)
                .with_data("jlink", json!({})),
        ],
    );

    let lister = DeviceLister::new(vec![usb as Arc<dyn Backend>, jlink as Arc<dyn Backend>], None);
    let devices = lister.reenumerate().await.unwrap();

    assert_eq!(devices.len(), 1);
    let device = &devices["680000001"];
    assert!(device.traits.contains(&DeviceTrait::Usb));
    assert!(device.traits.contains(&DeviceTrait::Jlink));
}

#[tokio::test]
async fn unidentifiable_device_is_signalled_not_dropped_silently() {
    let serial = ScriptedBackend::new(
        "serialport",
        vec![
            DeviceFragment::no_serial()
                .with_trait(DeviceTrait::SerialPort)
                .with_data("serialport", json!({ "path": "/dev/ttyACM0" })),
        ],
    );

    let lister = DeviceLister::new(vec![serial as Arc<dyn Backend>], None);
    let mut events = lister.subscribe();
    let devices = lister.reenumerate().await.unwrap();

    assert!(devices.is_empty());
    let events = drain(&mut events);
    assert!(
        events
            .iter()
            .any(|event| matches!(event, ListerEvent::NoSerialNumber(_)))
    );
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, ListerEvent::Error { .. }))
    );
}

#[tokio::test]
async fn pull_result_and_pushed_event_are_the_same_snapshot() {
    let usb = ScriptedBackend::new("usb", vec![usb_device("42", "x")]);
    let lister = DeviceLister::new(vec![usb as Arc<dyn Backend>], None);
    let mut events = lister.subscribe();

    let returned = lister.reenumerate().await.unwrap();
    let published = drain(&mut events)
        .into_iter()
        .find_map(|event| match event {
            ListerEvent::Conflated(map) => Some(map),
            _ => None,
        })
        .unwrap();

    assert!(Arc::ptr_eq(&returned, &published));
    assert!(Arc::ptr_eq(&returned, &lister.current_devices().await));
}

#[tokio::test]
async fn watch_mode_reenumerates_on_hardware_events() {
    let usb = ScriptedBackend::new("usb", vec![usb_device("42", "x")]);
    let (hotplug_tx, monitor) = MockMonitor::new();

    let lister = DeviceLister::new(vec![Arc::clone(&usb) as Arc<dyn Backend>], Some(monitor));
    lister.start().unwrap();
    assert!(usb.started.load(Ordering::SeqCst));

    // start() performs one initial enumeration.
    wait_for("initial round", || usb.calls() >= 1).await;
    let initial = usb.calls();

    hotplug_tx
        .send(HotplugEvent::Attached { bus: 1, address: 7 })
        .await
        .unwrap();
    wait_for("attach-triggered round", || usb.calls() > initial).await;

    // Detach events additionally invalidate backend caches.
    hotplug_tx
        .send(HotplugEvent::Detached { bus: 1, address: 7 })
        .await
        .unwrap();
    wait_for("detach notification", || {
        usb.detached.lock().unwrap().contains(&(1, 7))
    })
    .await;

    lister.stop();
    assert!(usb.stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn start_is_idempotent_and_stop_without_start_is_harmless() {
    let usb = ScriptedBackend::new("usb", vec![]);
    let (_hotplug_tx, monitor) = MockMonitor::new();
    let lister = DeviceLister::new(vec![Arc::clone(&usb) as Arc<dyn Backend>], Some(monitor));

    lister.stop();
    lister.start().unwrap();
    lister.start().unwrap();
    wait_for("initial round", || usb.calls() >= 1).await;
    lister.stop();
}

#[tokio::test]
async fn explicit_reenumerate_is_safe_alongside_watch_mode() {
    let usb = ScriptedBackend::new("usb", vec![usb_device("42", "x")]);
    let (hotplug_tx, monitor) = MockMonitor::new();
    let lister = DeviceLister::new(vec![Arc::clone(&usb) as Arc<dyn Backend>], Some(monitor));

    lister.start().unwrap();
    for _ in 0..5 {
        hotplug_tx
            .send(HotplugEvent::Attached { bus: 1, address: 1 })
            .await
            .unwrap();
    }
    let devices = lister.reenumerate().await.unwrap();
    assert_eq!(devices.len(), 1);
    lister.stop();
}
