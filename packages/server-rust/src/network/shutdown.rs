//! Health state machine and in-flight request tracking for graceful
//! shutdown.
//!
//! Health transitions are lock-free through `ArcSwap`; requests hold an
//! RAII [`InFlightGuard`] for as long as they run so the drain can wait for
//! them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Notify};

/// Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Ready,
    Draining,
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    /// Whether new requests are admitted in this state.
    #[must_use]
    pub fn admits_requests(self) -> bool {
        matches!(self, Self::Starting | Self::Ready)
    }
}

#[derive(Debug)]
struct InFlight {
    count: AtomicU64,
    idle: Notify,
}

/// Coordinates shutdown across the HTTP surface.
///
/// 1. Readiness probes report `health_state()`.
/// 2. The admission middleware calls [`try_admit`](Self::try_admit) and
///    turns requests away once draining.
/// 3. `trigger_shutdown()` moves to Draining and signals receivers.
/// 4. `wait_for_drain()` returns once every guard has been dropped.
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<InFlight>,
    health_state: ArcSwap<HealthState>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight: Arc::new(InFlight {
                count: AtomicU64::new(0),
                idle: Notify::new(),
            }),
            health_state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Receiver flipped to `true` when shutdown starts.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Moves to `Draining` and notifies every shutdown receiver.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        // Receivers may already be gone.
        let _ = self.shutdown_signal.send(true);
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Tracks one request for the lifetime of the returned guard.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Admits a request unless the server is draining or stopped.
    #[must_use]
    pub fn try_admit(&self) -> Option<InFlightGuard> {
        if self.health_state().admits_requests() {
            Some(self.in_flight_guard())
        } else {
            None
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits until no request is in flight, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` on success; returns `false`
    /// and stays `Draining` if the timeout expires first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            loop {
                let idle = self.in_flight.idle.notified();
                if self.in_flight_count() == 0 {
                    return;
                }
                idle.await;
            }
        })
        .await
        .is_ok();

        if drained {
            self.health_state.store(Arc::new(HealthState::Stopped));
        }
        drained
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count on drop, waking a pending drain when it
/// reaches zero.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}
