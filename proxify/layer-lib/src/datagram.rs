//! UDP egress policy.
//!
//! Datagrams can't be tunnelled through a CONNECT proxy, so the few that would leak the
//! application's traffic around it (QUIC on 443, and plain DNS which would bypass the fake
//! address mapping) are refused.

use std::net::SocketAddr;

use proxify_config::LayerConfig;

use crate::selector::{BlockReason, canonical_addr, is_loopback};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramVerdict {
    Allow,
    Reject(BlockReason),
}

#[derive(Debug, Clone, Copy)]
pub struct DatagramPolicy<'a> {
    config: &'a LayerConfig,
}

impl<'a> DatagramPolicy<'a> {
    pub fn new(config: &'a LayerConfig) -> Self {
        Self { config }
    }

    /// `destination` is `None` for a send on a connected socket, which is always allowed.
    pub fn check(&self, destination: Option<SocketAddr>) -> DatagramVerdict {
        let Some(destination) = destination.map(canonical_addr) else {
            return DatagramVerdict::Allow;
        };

        if !self.config.proxy.is_enabled() || is_loopback(destination.ip()) {
            return DatagramVerdict::Allow;
        }

        let port = destination.port();
        if self.config.udp_blocked_ports.contains(&port) {
            tracing::debug!(%destination, "datagram rejected");
            DatagramVerdict::Reject(BlockReason::UdpPort(port))
        } else {
            DatagramVerdict::Allow
        }
    }
}
