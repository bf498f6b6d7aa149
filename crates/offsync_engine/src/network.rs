//! Network connectivity monitoring and sync eligibility.
//!
//! A single platform [`PathMonitor`] feeds a [`NetworkMonitor`], which
//! multicasts every status change over a `watch` channel. Subscribers are
//! independent: dropping one never affects the others or the backend.

use crate::config::SyncConfiguration;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Classification of an active network path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Wi-Fi or similar without a data cap.
    Unmetered,
    /// Cellular or another billed link.
    Metered,
    /// Ethernet.
    Wired,
    /// Anything the platform cannot classify.
    Other,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionKind::Unmetered => "unmetered",
            ConnectionKind::Metered => "metered",
            ConnectionKind::Wired => "wired",
            ConnectionKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Connectivity as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    /// No usable path.
    Disconnected,
    /// A usable path.
    Connected {
        /// Path classification.
        kind: ConnectionKind,
        /// The platform flags the path as costly.
        expensive: bool,
        /// The user or platform enabled a low-data mode.
        constrained: bool,
    },
}

impl NetworkStatus {
    /// A connected status with default flags for `kind`: metered paths are
    /// expensive, nothing is constrained.
    pub fn connected(kind: ConnectionKind) -> Self {
        NetworkStatus::Connected {
            kind,
            expensive: kind == ConnectionKind::Metered,
            constrained: false,
        }
    }

    /// Returns true for any connected status.
    pub fn is_connected(&self) -> bool {
        matches!(self, NetworkStatus::Connected { .. })
    }

    /// Returns the path kind when connected.
    pub fn connection_type(&self) -> Option<ConnectionKind> {
        match self {
            NetworkStatus::Connected { kind, .. } => Some(*kind),
            NetworkStatus::Disconnected => None,
        }
    }

    /// Returns true if the path is flagged expensive.
    pub fn is_expensive(&self) -> bool {
        matches!(
            self,
            NetworkStatus::Connected {
                expensive: true,
                ..
            }
        )
    }

    /// Returns true if the path is flagged constrained.
    pub fn is_constrained(&self) -> bool {
        matches!(
            self,
            NetworkStatus::Connected {
                constrained: true,
                ..
            }
        )
    }

    /// Sync eligibility for this status.
    ///
    /// False when disconnected, when expensive and `allow_expensive` is
    /// false, or when constrained and `allow_constrained` is false.
    pub fn should_sync(&self, allow_expensive: bool, allow_constrained: bool) -> bool {
        match self {
            NetworkStatus::Disconnected => false,
            NetworkStatus::Connected {
                expensive,
                constrained,
                ..
            } => (!expensive || allow_expensive) && (!constrained || allow_constrained),
        }
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkStatus::Disconnected => f.write_str("disconnected"),
            NetworkStatus::Connected {
                kind,
                expensive,
                constrained,
            } => write!(
                f,
                "connected({kind}, expensive={expensive}, constrained={constrained})"
            ),
        }
    }
}

/// Handle a platform backend uses to report path changes.
#[derive(Clone)]
pub struct PathSink {
    tx: Arc<watch::Sender<NetworkStatus>>,
}

impl PathSink {
    /// Reports the current path. Repeated identical reports are ignored.
    pub fn update(&self, status: NetworkStatus) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            info!(%status, "network path changed");
        }
    }
}

/// Platform path monitor backend.
///
/// Implementations wrap the OS facility (netlink, SystemConfiguration,
/// ConnectivityManager, ...) and call [`PathSink::update`] from its
/// callback.
pub trait PathMonitor: Send + Sync {
    /// Starts delivering updates into `sink`. Should report the current
    /// path promptly.
    fn start(&self, sink: PathSink);

    /// Stops delivering updates.
    fn stop(&self);
}

/// A backend driven by explicit calls, for hosts that already receive
/// path callbacks elsewhere and for tests.
pub struct ManualPathMonitor {
    current: Mutex<NetworkStatus>,
    sink: Mutex<Option<PathSink>>,
}

impl ManualPathMonitor {
    /// Creates a backend that will report `initial` when started.
    pub fn new(initial: NetworkStatus) -> Self {
        Self {
            current: Mutex::new(initial),
            sink: Mutex::new(None),
        }
    }

    /// Reports a new path.
    pub fn set(&self, status: NetworkStatus) {
        *self.current.lock() = status;
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.update(status);
        }
    }

    /// Returns true while started.
    pub fn is_running(&self) -> bool {
        self.sink.lock().is_some()
    }
}

impl PathMonitor for ManualPathMonitor {
    fn start(&self, sink: PathSink) {
        sink.update(*self.current.lock());
        *self.sink.lock() = Some(sink);
    }

    fn stop(&self) {
        *self.sink.lock() = None;
    }
}

/// Shared connectivity monitor.
///
/// Construct once per process and pass by reference; the backend lives as
/// long as the monitor, independent of how many subscribers exist.
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<NetworkStatus>>,
    backend: Arc<dyn PathMonitor>,
    running: AtomicBool,
}

impl NetworkMonitor {
    /// Creates a monitor over `backend`. Status is `Disconnected` until the
    /// backend reports otherwise.
    pub fn new(backend: Arc<dyn PathMonitor>) -> Self {
        let (tx, _) = watch::channel(NetworkStatus::Disconnected);
        Self {
            tx: Arc::new(tx),
            backend,
            running: AtomicBool::new(false),
        }
    }

    /// Starts the backend. Calling it again is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("starting network monitor");
        self.backend.start(PathSink {
            tx: Arc::clone(&self.tx),
        });
    }

    /// Stops the backend. Subscribers keep the last status.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!("stopping network monitor");
            self.backend.stop();
        }
    }

    /// Returns true while the backend is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current status.
    pub fn current(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    /// True when any path is usable.
    pub fn is_connected(&self) -> bool {
        self.current().is_connected()
    }

    /// Current path kind, if connected.
    pub fn connection_type(&self) -> Option<ConnectionKind> {
        self.current().connection_type()
    }

    /// Sync eligibility for the current status.
    pub fn should_sync(&self, allow_expensive: bool, allow_constrained: bool) -> bool {
        self.current()
            .should_sync(allow_expensive, allow_constrained)
    }

    /// Sync eligibility under `config`'s policy.
    pub fn should_sync_with(&self, config: &SyncConfiguration) -> bool {
        self.should_sync(config.allow_expensive_sync, config.allow_constrained_sync)
    }

    /// Subscribes to status changes. The first `next()` yields the current
    /// status immediately.
    pub fn observe_connectivity(&self) -> ConnectivityStream {
        ConnectivityStream {
            rx: self.tx.subscribe(),
            primed: false,
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Waits until connected; returns at once if already connected.
    pub async fn wait_for_connectivity(&self) -> NetworkStatus {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while
        // this future is alive.
        let status = rx
            .wait_for(|status| status.is_connected())
            .await
            .map(|status| *status);
        status.unwrap_or_else(|_| self.current())
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One subscriber's view of connectivity changes.
///
/// Backed by a watch channel: a subscriber that falls behind sees only the
/// latest status, so a quick drop and restore between two reads can be
/// observed as no change at all. Callers react to the current status, not
/// to the history of transitions.
pub struct ConnectivityStream {
    rx: watch::Receiver<NetworkStatus>,
    primed: bool,
}

impl ConnectivityStream {
    /// Returns the current status on the first call, then waits for each
    /// subsequent change. Returns `None` once the monitor is gone.
    pub async fn next(&mut self) -> Option<NetworkStatus> {
        if !self.primed {
            self.primed = true;
            return Some(*self.rx.borrow_and_update());
        }
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Waits for the next change, skipping the initial status.
    pub async fn changed(&mut self) -> Option<NetworkStatus> {
        self.primed = true;
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Latest status without waiting.
    pub fn current(&self) -> NetworkStatus {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn monitor(initial: NetworkStatus) -> (Arc<ManualPathMonitor>, NetworkMonitor) {
        let backend = Arc::new(ManualPathMonitor::new(initial));
        let monitor = NetworkMonitor::new(backend.clone());
        monitor.start();
        (backend, monitor)
    }

    #[test]
    fn should_sync_policy() {
        let disconnected = NetworkStatus::Disconnected;
        assert!(!disconnected.should_sync(true, true));
        assert!(!disconnected.should_sync(false, false));

        let metered = NetworkStatus::connected(ConnectionKind::Metered);
        assert!(metered.is_expensive());
        assert!(!metered.should_sync(false, true));
        assert!(metered.should_sync(true, false));

        let low_data = NetworkStatus::Connected {
            kind: ConnectionKind::Unmetered,
            expensive: false,
            constrained: true,
        };
        assert!(!low_data.should_sync(true, false));
        assert!(low_data.should_sync(true, true));

        let wifi = NetworkStatus::connected(ConnectionKind::Unmetered);
        assert!(wifi.should_sync(false, false));
        assert_eq!(wifi.connection_type(), Some(ConnectionKind::Unmetered));
    }

    #[test]
    fn monitor_reflects_backend() {
        let (backend, monitor) = monitor(NetworkStatus::connected(ConnectionKind::Wired));
        assert!(monitor.is_running());
        assert!(monitor.is_connected());
        assert_eq!(monitor.connection_type(), Some(ConnectionKind::Wired));

        backend.set(NetworkStatus::Disconnected);
        assert!(!monitor.is_connected());
        assert!(!monitor.should_sync(true, true));

        monitor.stop();
        assert!(!backend.is_running());
    }

    #[tokio::test]
    async fn subscriber_gets_current_then_changes() {
        let (backend, monitor) = monitor(NetworkStatus::Disconnected);
        let mut stream = monitor.observe_connectivity();

        assert_eq!(stream.next().await, Some(NetworkStatus::Disconnected));

        backend.set(NetworkStatus::connected(ConnectionKind::Unmetered));
        let next = timeout(Duration::from_secs(1), stream.next()).await.unwrap();
        assert_eq!(next, Some(NetworkStatus::connected(ConnectionKind::Unmetered)));
    }

    #[tokio::test]
    async fn dropping_one_subscriber_keeps_others() {
        let (backend, monitor) = monitor(NetworkStatus::Disconnected);
        let mut a = monitor.observe_connectivity();
        let b = monitor.observe_connectivity();
        assert_eq!(monitor.subscriber_count(), 2);

        drop(b);
        assert_eq!(monitor.subscriber_count(), 1);
        assert!(monitor.is_running());

        a.next().await;
        backend.set(NetworkStatus::connected(ConnectionKind::Other));
        let next = timeout(Duration::from_secs(1), a.next()).await.unwrap();
        assert!(next.unwrap().is_connected());
    }

    #[tokio::test]
    async fn duplicate_updates_are_not_rebroadcast() {
        let (backend, monitor) = monitor(NetworkStatus::connected(ConnectionKind::Wired));
        let mut stream = monitor.observe_connectivity();
        stream.next().await;

        backend.set(NetworkStatus::connected(ConnectionKind::Wired));
        assert!(timeout(Duration::from_millis(50), stream.next()).await.is_err());
    }

    #[tokio::test]
    async fn lagging_subscriber_sees_latest_status_only() {
        let (backend, monitor) = monitor(NetworkStatus::connected(ConnectionKind::Wired));
        let mut stream = monitor.observe_connectivity();
        stream.next().await;

        backend.set(NetworkStatus::Disconnected);
        backend.set(NetworkStatus::connected(ConnectionKind::Metered));
        let next = timeout(Duration::from_secs(1), stream.next()).await.unwrap();
        assert_eq!(next, Some(NetworkStatus::connected(ConnectionKind::Metered)));
        assert!(timeout(Duration::from_millis(50), stream.next()).await.is_err());
    }

    #[tokio::test]
    async fn wait_for_connectivity_returns_immediately_when_connected() {
        let (_backend, monitor) = monitor(NetworkStatus::connected(ConnectionKind::Wired));
        let status = timeout(Duration::from_millis(50), monitor.wait_for_connectivity())
            .await
            .unwrap();
        assert!(status.is_connected());
    }

    #[tokio::test]
    async fn wait_for_connectivity_suspends_until_connected() {
        let (backend, monitor) = monitor(NetworkStatus::Disconnected);
        let monitor = Arc::new(monitor);

        let waiter = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.wait_for_connectivity().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        backend.set(NetworkStatus::connected(ConnectionKind::Metered));
        let status = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(status.connection_type(), Some(ConnectionKind::Metered));
    }
}
