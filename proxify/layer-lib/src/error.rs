//! Error types of the layer.
//!
//! None of these ever reach the application as-is: the intercepts translate them into the
//! failure convention of the function they replace (see [`windows`] for the Winsock codes).

#[cfg(target_os = "windows")]
pub mod windows;

use std::{io, net::SocketAddr};

use proxify_config::config::ConfigError;
use thiserror::Error;

use crate::{handshake::ProxyProtocol, selector::BlockReason};

#[derive(Error, Debug)]
pub enum FakeIpError {
    #[error("fake address range 198.18.0.0/16 is exhausted ({capacity} hostnames allocated)")]
    Exhausted { capacity: u32 },
}

/// Failure of a single CONNECT negotiation with the upstream proxy.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("IO error during {protocol} handshake: {source}")]
    Io {
        protocol: ProxyProtocol,
        #[source]
        source: io::Error,
    },

    #[error("proxy closed the connection during {0} handshake")]
    Closed(ProxyProtocol),

    #[error("proxy answered CONNECT with `{0}`")]
    HttpStatus(String),

    #[error("proxy is not a SOCKS5 server (version byte {0:#04x})")]
    Socks5Version(u8),

    #[error("SOCKS5 proxy requires authentication (method {0:#04x})")]
    Socks5Method(u8),

    #[error("SOCKS5 proxy refused CONNECT with reply code {0:#04x}")]
    Socks5Reply(u8),

    #[error("SOCKS5 reply uses unknown address type {0:#04x}")]
    Socks5AddressType(u8),

    #[error("hostname is {0} bytes long, SOCKS5 allows at most 255")]
    HostnameTooLong(usize),

    #[error("proxy refused CONNECT over {first_protocol} ({first}) and {second_protocol} ({second})")]
    Negotiation {
        first_protocol: ProxyProtocol,
        first: Box<HandshakeError>,
        second_protocol: ProxyProtocol,
        second: Box<HandshakeError>,
    },
}

impl HandshakeError {
    pub(crate) fn io(protocol: ProxyProtocol) -> impl FnOnce(io::Error) -> Self {
        move |source| HandshakeError::Io { protocol, source }
    }
}

/// Hard failure of a redirected connect.
#[derive(Error, Debug)]
pub enum RedirectError {
    #[error("connection blocked: {0}")]
    PolicyBlock(BlockReason),

    #[error("proxy at {addr} is unreachable: {source}")]
    ProxyUnreachable {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("no proxy address is reachable from an {0} socket")]
    NoProxyRoute(&'static str),

    #[error(transparent)]
    HandshakeFailed(#[from] HandshakeError),

    #[error("socket operation failed: {0}")]
    Socket(#[source] io::Error),
}

#[derive(Error, Debug)]
pub enum LayerError {
    #[error("proxify-layer: configuration failed: {0}")]
    Config(#[from] ConfigError),

    #[error("proxify-layer: {0} is already initialized")]
    GlobalAlreadyInitialized(&'static str),

    #[error("proxify-layer: failed to hook `{dll}!{function}`: {error}")]
    HookEngineApply {
        function: &'static str,
        dll: &'static str,
        error: String,
    },

    #[error("proxify-layer: `{0}` was hooked twice")]
    HookAlreadyApplied(&'static str),

    #[error("proxify-layer: failed to enable hooks: {0}")]
    HookEngineEnable(String),

    #[error("proxify-layer: failed to remove hooks: {0}")]
    HookEngineRemove(String),

    #[error("proxify-layer: process {0} not found")]
    ProcessNotFound(u32),

    #[error("proxify-layer: failed to inject layer: {0}")]
    DllInjection(String),

    #[cfg(target_os = "windows")]
    #[error("proxify-layer: process creation failed: {0}")]
    WindowsProcessCreation(windows::WindowsError),

    #[error("proxify-layer: IO failed with `{0}`")]
    Io(#[from] io::Error),
}

pub type LayerResult<T, E = LayerError> = Result<T, E>;
