//! Server reachability tracking.
//!
//! A background task probes the server on a fixed interval. Raw probe results
//! are noisy in the sense that they repeat, so `ConnectivityTracker` reduces
//! them to transitions and the UI only hears about changes.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::ollama::OllamaClient;
use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

#[derive(Debug)]
pub struct ConnectivityTracker {
    state: Connectivity,
}

impl Default for ConnectivityTracker {
    fn default() -> Self {
        Self {
            state: Connectivity::Online,
        }
    }
}

impl ConnectivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn state(&self) -> Connectivity {
        self.state
    }

    /// Record a probe result. Returns the new state only when it changed.
    pub fn observe(&mut self, reachable: bool) -> Option<Connectivity> {
        let next = if reachable {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        if next == self.state {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

/// Probe `client` every `interval` until the receiving side goes away.
pub fn spawn_monitor(
    client: OllamaClient,
    interval: Duration,
    tx: UnboundedSender<AppEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tracker = ConnectivityTracker::new();
        let mut ticker = monitor_ticker(interval);
        loop {
            ticker.tick().await;
            let reachable = client.probe().await;
            if let Some(change) = tracker.observe(reachable) {
                match change {
                    Connectivity::Online => info!("server {} is reachable again", client.base_url()),
                    Connectivity::Offline => warn!("server {} is unreachable", client.base_url()),
                }
                if tx.send(AppEvent::Connectivity(change)).is_err() {
                    break;
                }
            }
        }
    })
}

/// A slow probe must push the next one back rather than queue up a burst.
fn monitor_ticker(interval: Duration) -> Interval {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
