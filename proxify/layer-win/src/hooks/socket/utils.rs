//! Raw Winsock helpers: address conversion and the [`RedirectSocket`] implementation.

use std::{
    io, mem,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use proxify_layer_lib::redirect::RedirectSocket;
use winapi::{
    shared::{
        minwindef::{DWORD, INT},
        ws2def::{
            AF_INET, AF_INET6, IPPROTO_IPV6, SOCK_STREAM, SOCKADDR, SOCKADDR_IN,
            SOCKADDR_STORAGE, SO_RCVTIMEO, SO_TYPE, SOL_SOCKET,
        },
        ws2ipdef::{IPV6_V6ONLY, SOCKADDR_IN6},
    },
    um::winsock2::{
        FIONBIO, SOCKET, SOCKET_ERROR, WSAGetLastError, closesocket, getsockopt, recv, send,
        setsockopt,
    },
};

use super::{CONNECT_ORIGINAL, IOCTL_SOCKET_ORIGINAL};

/// Converts a `SOCKADDR` handed to us by the application. `None` for families other than
/// `AF_INET` and `AF_INET6` or truncated buffers.
///
/// # Safety
///
/// `addr` must be null or point to at least `addrlen` readable bytes.
pub unsafe fn socket_addr_from_raw(addr: *const SOCKADDR, addrlen: INT) -> Option<SocketAddr> {
    if addr.is_null() || addrlen < mem::size_of::<SOCKADDR_IN>() as INT {
        return None;
    }

    match unsafe { (*addr).sa_family } as i32 {
        AF_INET => {
            let addr_in = unsafe { &*(addr as *const SOCKADDR_IN) };
            let ip = Ipv4Addr::from(u32::from_be(unsafe { *addr_in.sin_addr.S_un.S_addr() }));

            Some(SocketAddr::new(ip.into(), u16::from_be(addr_in.sin_port)))
        }
        AF_INET6 if addrlen >= mem::size_of::<SOCKADDR_IN6>() as INT => {
            let addr_in6 = unsafe { &*(addr as *const SOCKADDR_IN6) };
            let ip = Ipv6Addr::from(unsafe { *addr_in6.sin6_addr.u.Byte() });

            Some(SocketAddr::new(ip.into(), u16::from_be(addr_in6.sin6_port)))
        }
        _ => None,
    }
}

/// Owned `SOCKADDR` for `addr`, with its length.
pub fn socket_addr_to_raw(addr: &SocketAddr) -> (SOCKADDR_STORAGE, INT) {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };

    let len = match addr {
        SocketAddr::V4(v4) => {
            let addr_in = unsafe { &mut *(&mut storage as *mut _ as *mut SOCKADDR_IN) };
            addr_in.sin_family = AF_INET as u16;
            addr_in.sin_port = v4.port().to_be();
            unsafe { *addr_in.sin_addr.S_un.S_addr_mut() = u32::from(*v4.ip()).to_be() };

            mem::size_of::<SOCKADDR_IN>()
        }
        SocketAddr::V6(v6) => {
            let addr_in6 = unsafe { &mut *(&mut storage as *mut _ as *mut SOCKADDR_IN6) };
            addr_in6.sin6_family = AF_INET6 as u16;
            addr_in6.sin6_port = v6.port().to_be();
            addr_in6.sin6_flowinfo = v6.flowinfo();
            unsafe { *addr_in6.sin6_addr.u.Byte_mut() = v6.ip().octets() };

            mem::size_of::<SOCKADDR_IN6>()
        }
    };

    (storage, len as INT)
}

pub fn last_wsa_error() -> io::Error {
    io::Error::from_raw_os_error(unsafe { WSAGetLastError() })
}

/// An application socket, driven through the original (unhooked) functions.
#[derive(Debug, Clone, Copy)]
pub struct WinSocket(pub SOCKET);

impl WinSocket {
    fn set_option<T>(&self, level: INT, name: INT, value: &T) -> io::Result<()> {
        let result = unsafe {
            setsockopt(
                self.0,
                level,
                name,
                value as *const T as *const _,
                mem::size_of::<T>() as INT,
            )
        };

        if result == SOCKET_ERROR {
            Err(last_wsa_error())
        } else {
            Ok(())
        }
    }

    /// `ioctlsocket(FIONBIO)`, bypassing our own intercept so it doesn't record the change.
    pub fn ioctl_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        let mut argp: u32 = nonblocking.into();

        let result = match IOCTL_SOCKET_ORIGINAL.get() {
            Some(original) => unsafe { original(self.0, FIONBIO, &mut argp) },
            None => unsafe { winapi::um::winsock2::ioctlsocket(self.0, FIONBIO, &mut argp) },
        };

        if result == SOCKET_ERROR {
            Err(last_wsa_error())
        } else {
            Ok(())
        }
    }
}

impl RedirectSocket for WinSocket {
    fn stream_kind(&self) -> io::Result<Result<(), i32>> {
        let mut kind: INT = 0;
        let mut len = mem::size_of::<INT>() as INT;

        let result = unsafe {
            getsockopt(
                self.0,
                SOL_SOCKET,
                SO_TYPE,
                &mut kind as *mut INT as *mut _,
                &mut len,
            )
        };
        if result == SOCKET_ERROR {
            return Err(last_wsa_error());
        }

        Ok(if kind == SOCK_STREAM { Ok(()) } else { Err(kind) })
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.ioctl_nonblocking(nonblocking)
    }

    fn set_only_v6(&self, only_v6: bool) -> io::Result<()> {
        let value: DWORD = only_v6.into();
        self.set_option(IPPROTO_IPV6 as INT, IPV6_V6ONLY, &value)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        // Zero means no timeout.
        let millis: DWORD = timeout
            .map(|timeout| timeout.as_millis().clamp(1, DWORD::MAX as u128) as DWORD)
            .unwrap_or(0);
        self.set_option(SOL_SOCKET, SO_RCVTIMEO, &millis)
    }

    fn connect_to(&self, addr: SocketAddr) -> io::Result<()> {
        let Some(original) = CONNECT_ORIGINAL.get() else {
            return Err(io::Error::other("connect is not hooked"));
        };
        let (storage, len) = socket_addr_to_raw(&addr);

        let result = unsafe { original(self.0, &storage as *const _ as *const SOCKADDR, len) };
        if result == SOCKET_ERROR {
            Err(last_wsa_error())
        } else {
            Ok(())
        }
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len().min(INT::MAX as usize) as INT;

        let sent = unsafe { send(self.0, buf.as_ptr() as *const _, len, 0) };
        if sent == SOCKET_ERROR {
            Err(last_wsa_error())
        } else {
            Ok(sent as usize)
        }
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(INT::MAX as usize) as INT;

        let received = unsafe { recv(self.0, buf.as_mut_ptr() as *mut _, len, 0) };
        if received == SOCKET_ERROR {
            Err(last_wsa_error())
        } else {
            Ok(received as usize)
        }
    }

    fn close(&self) {
        if unsafe { closesocket(self.0) } == SOCKET_ERROR {
            tracing::debug!(socket = self.0, error = %last_wsa_error(), "closesocket failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("93.184.216.34:443")]
    #[case("198.18.0.1:80")]
    #[case("[2001:db8::1]:8443")]
    #[case("[::ffff:127.0.0.1]:8080")]
    fn raw_address_conversion(#[case] addr: &str) {
        let addr: SocketAddr = addr.parse().unwrap();

        let (storage, len) = socket_addr_to_raw(&addr);
        let parsed =
            unsafe { socket_addr_from_raw(&storage as *const _ as *const SOCKADDR, len) };

        assert_eq!(parsed, Some(addr));
    }

    #[rstest]
    fn truncated_address_is_rejected() {
        let (storage, _) = socket_addr_to_raw(&"[2001:db8::1]:443".parse().unwrap());

        let parsed = unsafe {
            socket_addr_from_raw(
                &storage as *const _ as *const SOCKADDR,
                mem::size_of::<SOCKADDR_IN>() as INT,
            )
        };

        assert_eq!(parsed, None);
        assert_eq!(unsafe { socket_addr_from_raw(std::ptr::null(), 16) }, None);
    }
}
