#![warn(clippy::indexing_slicing)]

//! Configuration for the proxify layer.
//!
//! The configuration is assembled from (lowest to highest priority):
//!
//! 1. Built-in defaults;
//! 2. The current user's system proxy string (see [`system`]);
//! 3. A JSON file pointed to by [`PROXIFY_CONFIG_FILE_ENV`];
//! 4. `PROXIFY_*` environment variables.
//!
//! The result is a [`LayerConfig`], which is immutable for the lifetime of the process.

pub mod config;
pub mod layer;
pub mod proxy;
pub mod system;
pub mod util;

pub use layer::{LayerConfig, LayerFileConfig};
pub use proxy::{Ipv6Mode, ProtocolHint, ProxyConfig};

/// Path to a JSON configuration file, see [`LayerFileConfig`].
pub const PROXIFY_CONFIG_FILE_ENV: &str = "PROXIFY_CONFIG_FILE";

/// Upstream proxy, in the same syntax as the system proxy string (`[label=][scheme://]host:port`).
pub const PROXIFY_PROXY_ENV: &str = "PROXIFY_PROXY";

/// Preferred handshake protocol, `http` or `socks5`.
pub const PROXIFY_PROXY_PROTOCOL_ENV: &str = "PROXIFY_PROXY_PROTOCOL";

/// IPv6 handling, one of `proxy`, `direct` or `block`.
pub const PROXIFY_IPV6_MODE_ENV: &str = "PROXIFY_IPV6_MODE";

/// Receive timeout applied to the proxy handshake, in milliseconds.
pub const PROXIFY_TIMEOUT_MS_ENV: &str = "PROXIFY_TIMEOUT_MS";

/// Comma separated IPv6 prefixes whose port 443 traffic is never redirected.
pub const PROXIFY_DNS_BYPASS_ENV: &str = "PROXIFY_DNS_BYPASS";

/// Comma separated UDP destination ports that are rejected while the proxy is enabled.
pub const PROXIFY_UDP_BLOCKED_PORTS_ENV: &str = "PROXIFY_UDP_BLOCKED_PORTS";

/// When `true`, the layer stays loaded but passes every call through.
pub const PROXIFY_DISABLE_ENV: &str = "PROXIFY_DISABLE";
