//! Connectivity state and offline to online transitions
//!
//! The monitor is a cheap cloneable handle around a watch channel. Platform
//! glue (or a [`ConnectivityProbe`] loop) calls [`ConnectivityMonitor::set_online`];
//! sync code reads [`ConnectivityMonitor::is_online`] and waits on
//! [`OnlineTransitions::next`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinkState {
    online: bool,
    /// Number of offline to online transitions so far
    reconnects: u64,
}

#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<LinkState>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(LinkState {
            online,
            reconnects: 0,
        });
        Self {
            state: Arc::new(state),
        }
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().online
    }

    /// Report the current link state; returns whether it changed
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.online == online {
                return false;
            }
            state.online = online;
            if online {
                state.reconnects += 1;
            }
            true
        });

        if changed {
            if online {
                tracing::info!("Connectivity restored");
            } else {
                tracing::info!("Connectivity lost");
            }
        }
        changed
    }

    /// Subscribe to future offline to online transitions
    pub fn transitions(&self) -> OnlineTransitions {
        let rx = self.state.subscribe();
        let seen = rx.borrow().reconnects;
        OnlineTransitions { rx, seen }
    }
}

/// Stream of offline to online transitions
///
/// Transitions that happen while the holder is busy are not lost: the next
/// call to [`OnlineTransitions::next`] returns immediately.
pub struct OnlineTransitions {
    rx: watch::Receiver<LinkState>,
    seen: u64,
}

impl OnlineTransitions {
    /// Wait for the next transition; `None` once the monitor is dropped
    pub async fn next(&mut self) -> Option<()> {
        loop {
            let reconnects = self.rx.borrow_and_update().reconnects;
            if reconnects > self.seen {
                self.seen = reconnects;
                return Some(());
            }
            self.rx.changed().await.ok()?;
        }
    }
}

/// Reachability check feeding a [`ConnectivityMonitor`]
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Probe that considers the link up when a TCP connection to `address` succeeds
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn check(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(error)) => {
                tracing::debug!("Probe to {} failed: {error}", self.address);
                false
            }
            Err(_) => {
                tracing::debug!("Probe to {} timed out", self.address);
                false
            }
        }
    }
}

/// Run `probe` every `interval` and publish the result to `monitor`
pub fn spawn_probe_loop(
    monitor: ConnectivityMonitor,
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let online = probe.check().await;
            monitor.set_online(online);
        }
    })
}
