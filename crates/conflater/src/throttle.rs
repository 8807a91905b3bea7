//! Reenumeration throttle
//!
//! USB attach/detach notifications arrive in bursts: a composite device
//! enumerating as several sub-devices fires one event per interface.
//! Running a full enumeration per event would be wasteful and could
//! interleave rounds, so triggers are coalesced: at most one enumeration
//! runs at any instant and at most one more is queued behind it. Any
//! further triggers during that window are dropped, since the queued run
//! will already observe the post-burst device state.

use std::future::Future;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

/// Coalesces bursty reenumeration triggers into bounded rounds
///
/// Implemented as a capacity-1 channel drained by a worker task: while a
/// round is in flight the buffer holds at most one queued trigger, and
/// `try_send` drops the rest.
pub struct Throttle {
    trigger_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl Throttle {
    /// Spawn the worker task driving `round` once per accepted trigger
    ///
    /// Rounds never overlap: the worker awaits each round to completion
    /// before looking at the queue again.
    pub fn new<F, Fut>(mut round: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            while trigger_rx.recv().await.is_some() {
                round().await;
            }
            trace!("throttle worker exiting");
        });
        Self {
            trigger_tx: Mutex::new(Some(trigger_tx)),
        }
    }

    /// Request a reenumeration round
    ///
    /// Returns whether the trigger was accepted; a dropped trigger means a
    /// round is already running with another one queued behind it.
    pub fn trigger(&self) -> bool {
        let guard = self.trigger_tx.lock().expect("throttle lock poisoned");
        match guard.as_ref() {
            Some(tx) => tx.try_send(()).is_ok(),
            None => false,
        }
    }

    /// Stop accepting triggers
    ///
    /// The in-flight round, and a follow-up already queued behind it, still
    /// run to completion; there is no cancellation.
    pub fn stop(&self) {
        self.trigger_tx.lock().expect("throttle lock poisoned").take();
    }
}

impl Drop for Throttle {
    fn drop(&mut self) {
        self.stop();
    }
}
