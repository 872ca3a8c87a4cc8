//! Background watcher for the host's local network address.
//!
//! Runs as a tokio task on the owning interface's runtime and reports
//! changes over a channel that the interface drains from its `check()`.
//! Cancellation goes through a [`Notify`], so stopping never waits for the
//! next poll.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Source of the host's current local address.
pub trait AddressProbe: Send + Sync {
    fn local_address(&self) -> std::io::Result<IpAddr>;
}

/// Finds the address of the interface that routes to `target`.
///
/// Connecting a UDP socket sends no packets; it only selects a route.
#[derive(Debug, Clone)]
pub struct RouteProbe {
    target: SocketAddr,
}

impl RouteProbe {
    pub fn new(target: SocketAddr) -> Self {
        Self { target }
    }
}

impl Default for RouteProbe {
    fn default() -> Self {
        Self::new(SocketAddr::from(([8, 8, 8, 8], 80)))
    }
}

impl AddressProbe for RouteProbe {
    fn local_address(&self) -> std::io::Result<IpAddr> {
        let bind: SocketAddr = if self.target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(self.target)?;
        Ok(socket.local_addr()?.ip())
    }
}

/// A detected address change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressChange {
    pub previous: Option<IpAddr>,
    pub current: IpAddr,
}

/// Handle to a running watcher task.
pub struct AddressWatcher {
    shutdown: Arc<Notify>,
    changes: mpsc::UnboundedReceiver<AddressChange>,
    task: JoinHandle<()>,
}

impl AddressWatcher {
    /// Spawn the watcher on `runtime`, polling `probe` every `interval`.
    ///
    /// `initial` is the address already reported; only differences from it
    /// are sent.
    pub fn spawn(
        runtime: &Handle,
        probe: Arc<dyn AddressProbe>,
        interval: Duration,
        initial: Option<IpAddr>,
    ) -> Self {
        let shutdown = Arc::new(Notify::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let signal = Arc::clone(&shutdown);

        let task = runtime.spawn(async move {
            let mut last = initial;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; `initial` already covers it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = ticker.tick() => {
                        match probe.local_address() {
                            Ok(current) if Some(current) != last => {
                                info!(previous = ?last, %current, "local address changed");
                                if tx.send(AddressChange { previous: last, current }).is_err() {
                                    break;
                                }
                                last = Some(current);
                            }
                            Ok(_) => {}
                            Err(e) => debug!(error = %e, "local address probe failed"),
                        }
                    }
                }
            }
            debug!("address watcher stopped");
        });

        Self {
            shutdown,
            changes: rx,
            task,
        }
    }

    /// Take every change reported since the last call.
    pub fn drain(&mut self) -> Vec<AddressChange> {
        let mut out = Vec::new();
        while let Ok(change) = self.changes.try_recv() {
            out.push(change);
        }
        out
    }

    /// Signal the task to stop and wait for it.
    pub async fn stop(self) {
        // `notify_one` stores a permit if the task is between polls.
        self.shutdown.notify_one();
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns the queued addresses in order, then repeats the last one.
    struct ScriptedProbe {
        addresses: Mutex<Vec<IpAddr>>,
    }

    impl ScriptedProbe {
        fn new(addresses: &[[u8; 4]]) -> Self {
            Self {
                addresses: Mutex::new(addresses.iter().rev().map(|a| IpAddr::from(*a)).collect()),
            }
        }
    }

    impl AddressProbe for ScriptedProbe {
        fn local_address(&self) -> std::io::Result<IpAddr> {
            let mut addresses = self.addresses.lock().unwrap();
            if addresses.len() > 1 {
                Ok(addresses.pop().unwrap())
            } else {
                Ok(addresses[0])
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reports_only_changes() {
        let probe = Arc::new(ScriptedProbe::new(&[
            [10, 0, 0, 1],
            [10, 0, 0, 1],
            [10, 0, 0, 2],
        ]));
        let mut watcher = AddressWatcher::spawn(
            &Handle::current(),
            probe,
            Duration::from_secs(60),
            Some(IpAddr::from([10, 0, 0, 1])),
        );

        tokio::time::sleep(Duration::from_secs(60 * 4 + 1)).await;
        let changes = watcher.drain();
        assert_eq!(
            changes,
            vec![AddressChange {
                previous: Some(IpAddr::from([10, 0, 0, 1])),
                current: IpAddr::from([10, 0, 0, 2]),
            }]
        );
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_prompt() {
        let probe = Arc::new(ScriptedProbe::new(&[[10, 0, 0, 1]]));
        let watcher = AddressWatcher::spawn(
            &Handle::current(),
            probe,
            Duration::from_secs(3600),
            None,
        );
        tokio::time::timeout(Duration::from_secs(1), watcher.stop())
            .await
            .unwrap();
    }
}
