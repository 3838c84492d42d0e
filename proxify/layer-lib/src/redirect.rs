//! Taking over a socket and tunnelling it through the proxy.

use std::{
    io::{self, Read, Write},
    net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs},
    time::Duration,
};

use proxify_config::ProxyConfig;

use crate::{
    detour::{Bypass, Detour},
    error::RedirectError,
    handshake::{self, ProxyProtocol},
    selector::{ConnectDecision, ConnectSelector, RedirectTarget},
};

/// The socket operations the redirection needs, implemented by the platform layer on top of the
/// *original* (unhooked) functions.
pub trait RedirectSocket {
    /// Whether this is a `SOCK_STREAM` socket. `Err` carries the socket type otherwise.
    fn stream_kind(&self) -> io::Result<Result<(), i32>>;

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    fn set_only_v6(&self, only_v6: bool) -> io::Result<()>;

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Blocking connect, through the original connect function.
    fn connect_to(&self, addr: SocketAddr) -> io::Result<()>;

    fn send(&self, buf: &[u8]) -> io::Result<usize>;

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Releases the socket after a failed handshake. The application's handle becomes unusable.
    fn close(&self);
}

/// [`Read`] + [`Write`] view of a [`RedirectSocket`], for the handshake.
pub struct SocketStream<'a, S>(pub &'a S);

impl<S: RedirectSocket> Read for SocketStream<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.recv(buf)
    }
}

impl<S: RedirectSocket> Write for SocketStream<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RedirectSocket for socket2::Socket {
    fn stream_kind(&self) -> io::Result<Result<(), i32>> {
        let kind = self.r#type()?;
        if kind == socket2::Type::STREAM {
            Ok(Ok(()))
        } else {
            Ok(Err(i32::from(kind)))
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        socket2::Socket::set_nonblocking(self, nonblocking)
    }

    fn set_only_v6(&self, only_v6: bool) -> io::Result<()> {
        socket2::Socket::set_only_v6(self, only_v6)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        socket2::Socket::set_read_timeout(self, timeout)
    }

    fn connect_to(&self, addr: SocketAddr) -> io::Result<()> {
        self.connect(&addr.into())
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        socket2::Socket::send(self, buf)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut socket = self;
        socket.read(buf)
    }

    /// An owned socket is closed when dropped, so this only shuts it down.
    fn close(&self) {
        let _ = self.shutdown(std::net::Shutdown::Both);
    }
}

/// The proxy's addresses, resolved once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyEndpoints {
    pub v4: Option<SocketAddrV4>,
    pub v6: Option<SocketAddrV6>,
}

/// Where a socket of a given family connects to reach the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyRoute {
    pub addr: SocketAddr,
    /// The socket is IPv6 and must accept IPv4-mapped addresses.
    pub dual_stack: bool,
}

impl ProxyEndpoints {
    /// Resolves the configured proxy host. Literal addresses don't touch the resolver.
    pub fn resolve(proxy: &ProxyConfig) -> io::Result<Self> {
        let mut endpoints = Self::default();

        for addr in (proxy.host(), proxy.port()).to_socket_addrs()? {
            match addr {
                SocketAddr::V4(v4) => {
                    endpoints.v4.get_or_insert(v4);
                }
                SocketAddr::V6(v6) => {
                    endpoints.v6.get_or_insert(v6);
                }
            }
        }

        if endpoints.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("`{}` did not resolve to any address", proxy.host()),
            ));
        }

        Ok(endpoints)
    }

    pub fn from_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self {
                v4: Some(v4),
                v6: None,
            },
            SocketAddr::V6(v6) => Self {
                v4: None,
                v6: Some(v6),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_none() && self.v6.is_none()
    }

    /// Proxy address for a socket that was asked to connect to `destination`.
    ///
    /// The socket family is the family of the address passed to `connect`. IPv6 sockets prefer
    /// the IPv4 proxy through its mapped form (`::ffff:a.b.c.d`).
    pub fn route_for(&self, destination: &SocketAddr) -> Option<ProxyRoute> {
        match destination {
            SocketAddr::V4(_) => self.v4.map(|v4| ProxyRoute {
                addr: SocketAddr::V4(v4),
                dual_stack: false,
            }),
            SocketAddr::V6(_) => match (self.v4, self.v6) {
                (Some(v4), _) => Some(ProxyRoute {
                    addr: SocketAddr::new(IpAddr::V6(v4.ip().to_ipv6_mapped()), v4.port()),
                    dual_stack: true,
                }),
                (None, Some(v6)) => Some(ProxyRoute {
                    addr: SocketAddr::V6(v6),
                    dual_stack: false,
                }),
                (None, None) => None,
            },
        }
    }
}

/// `WSAEINVAL`, returned by `FIONBIO` on a socket registered with `WSAEventSelect` or
/// `WSAAsyncSelect`.
const WSAEINVAL: i32 = 10022;

/// Puts the socket in blocking mode for the duration of the redirection and restores the
/// application's mode when dropped.
///
/// A socket that refuses the switch is redirected in the mode it is in.
struct BlockingGuard<'s, S: RedirectSocket> {
    socket: &'s S,
    restore_nonblocking: bool,
}

impl<'s, S: RedirectSocket> BlockingGuard<'s, S> {
    fn new(socket: &'s S, nonblocking: bool) -> Self {
        let switched = match socket.set_nonblocking(false) {
            Ok(()) => true,
            Err(error) if error.raw_os_error() == Some(WSAEINVAL) => {
                tracing::warn!(
                    %error,
                    "socket uses event notification and can't be made blocking, redirecting as is"
                );
                false
            }
            Err(error) => {
                tracing::warn!(%error, "could not switch to blocking mode, redirecting as is");
                false
            }
        };

        Self {
            socket,
            restore_nonblocking: switched && nonblocking,
        }
    }
}

impl<S: RedirectSocket> Drop for BlockingGuard<'_, S> {
    fn drop(&mut self) {
        if self.restore_nonblocking {
            if let Err(error) = self.socket.set_nonblocking(true) {
                tracing::warn!(%error, "failed restoring non-blocking mode");
            }
        }
    }
}

/// A connect that now goes through the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirected {
    pub target: RedirectTarget,
    pub proxy: SocketAddr,
    pub protocol: ProxyProtocol,
}

/// Classifies a connect and, when it must be redirected, drives it to completion.
#[derive(Debug, Clone, Copy)]
pub struct Redirector<'a> {
    selector: ConnectSelector<'a>,
    proxy: &'a ProxyConfig,
    endpoints: &'a ProxyEndpoints,
}

impl<'a> Redirector<'a> {
    pub fn new(
        selector: ConnectSelector<'a>,
        proxy: &'a ProxyConfig,
        endpoints: &'a ProxyEndpoints,
    ) -> Self {
        Self {
            selector,
            proxy,
            endpoints,
        }
    }

    /// Runs a connect to `destination` on `socket`.
    ///
    /// - [`Detour::Bypass`]: the original connect must be called, nothing was touched;
    /// - [`Detour::Error`]: the connect failed and must be reported;
    /// - [`Detour::Success`]: `socket` is connected to the proxy and tunnelled to the target.
    ///
    /// `nonblocking` is the mode the application put the socket in, it is restored on every
    /// exit path. A socket whose handshake failed is closed.
    #[tracing::instrument(level = "debug", skip(self, socket), ret)]
    pub fn connect<S: RedirectSocket>(
        &self,
        socket: &S,
        destination: SocketAddr,
        nonblocking: bool,
    ) -> Detour<Redirected> {
        match socket.stream_kind() {
            Ok(Ok(())) => {}
            Ok(Err(kind)) => return Detour::Bypass(Bypass::NotStream(kind)),
            Err(error) => {
                tracing::debug!(%error, "could not query socket type");
                return Detour::Bypass(Bypass::AddressConversion);
            }
        }

        let target = match self.selector.classify(destination) {
            ConnectDecision::Bypass(bypass) => return Detour::Bypass(bypass),
            ConnectDecision::Block(reason) => {
                tracing::info!(%destination, %reason, "connection blocked");
                return Detour::Error(RedirectError::PolicyBlock(reason));
            }
            ConnectDecision::Redirect(target) => target,
        };

        let Some(route) = self.endpoints.route_for(&destination) else {
            let family = if destination.is_ipv4() { "IPv4" } else { "IPv6" };
            return Detour::Error(RedirectError::NoProxyRoute(family));
        };

        self.tunnel(socket, route, target, nonblocking).into()
    }

    fn tunnel<S: RedirectSocket>(
        &self,
        socket: &S,
        route: ProxyRoute,
        target: RedirectTarget,
        nonblocking: bool,
    ) -> Result<Redirected, RedirectError> {
        let guard = BlockingGuard::new(socket, nonblocking);

        if route.dual_stack {
            if let Err(error) = socket.set_only_v6(false) {
                tracing::warn!(%error, "could not clear IPV6_V6ONLY, mapped proxy address may fail");
            }
        }

        socket
            .connect_to(route.addr)
            .map_err(|source| RedirectError::ProxyUnreachable {
                addr: route.addr,
                source,
            })?;

        tracing::debug!(
            proxy = %route.addr,
            declared = %self.proxy.protocol_hint,
            %target,
            "connected to proxy"
        );

        let negotiated = socket
            .set_read_timeout(Some(self.proxy.timeout()))
            .map_err(RedirectError::Socket)
            .and_then(|()| {
                let mut stream = SocketStream(socket);
                handshake::negotiate(&mut stream, &target)
                    .map_err(RedirectError::from)
            });

        match negotiated {
            Ok(protocol) => {
                if let Err(error) = socket.set_read_timeout(None) {
                    tracing::warn!(%error, "failed clearing handshake timeout");
                }
                drop(guard);

                tracing::info!(%target, proxy = %route.addr, %protocol, "connection redirected");
                Ok(Redirected {
                    target,
                    proxy: route.addr,
                    protocol,
                })
            }
            Err(error) => {
                drop(guard);
                socket.close();

                tracing::warn!(%target, proxy = %route.addr, %error, "proxy handshake failed");
                Err(error)
            }
        }
    }
}
