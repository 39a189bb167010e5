//! Network link state.
//!
//! Stands in for the connectivity collaborator: whatever brings the network
//! interface up (Wi-Fi association, DHCP, a cable) reports `Up`/`Down` through a
//! [`LinkHandle`], and the pipeline observes it through a [`LinkMonitor`].
//!
//! Startup waits for the first `Up` before creating the datagram socket. After
//! that the packetizer checks the state at every flush and discards the buffer
//! while the link is down, the same way a missing socket would.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{AppResult, StreamError};

/// Connectivity as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No usable network path.
    Down,
    /// Ready to send datagrams.
    Up,
}

/// Reporting side, owned by the connectivity layer.
#[derive(Debug)]
pub struct LinkHandle {
    tx: watch::Sender<LinkState>,
}

/// Observing side, cloned into pipeline components.
#[derive(Debug, Clone)]
pub struct LinkMonitor {
    rx: watch::Receiver<LinkState>,
}

/// Create a link channel in the given initial state.
pub fn link_channel(initial: LinkState) -> (LinkHandle, LinkMonitor) {
    let (tx, rx) = watch::channel(initial);
    (LinkHandle { tx }, LinkMonitor { rx })
}

impl LinkHandle {
    /// Report that the link came up.
    pub fn set_up(&self) {
        if self.tx.send_replace(LinkState::Up) != LinkState::Up {
            info!("Network link up");
        }
    }

    /// Report that the link went down.
    pub fn set_down(&self) {
        if self.tx.send_replace(LinkState::Down) != LinkState::Down {
            warn!("Network link down");
        }
    }

    /// A new observer of this link.
    pub fn monitor(&self) -> LinkMonitor {
        LinkMonitor {
            rx: self.tx.subscribe(),
        }
    }
}

impl LinkMonitor {
    /// Current state.
    pub fn state(&self) -> LinkState {
        *self.rx.borrow()
    }

    /// Whether datagrams can be sent right now.
    pub fn is_up(&self) -> bool {
        self.state() == LinkState::Up
    }

    /// Wait until the link is up, failing after `timeout`.
    pub async fn wait_ready(&mut self, timeout: Duration) -> AppResult<()> {
        let wait = self.rx.wait_for(|state| *state == LinkState::Up);
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(StreamError::LinkClosed),
            Err(_) => Err(StreamError::LinkTimeout(timeout)),
        }
    }
}
