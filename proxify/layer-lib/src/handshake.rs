//! CONNECT negotiation with the upstream proxy.
//!
//! Everything here works on a stream that is already connected to the proxy. Nothing is
//! retried: a failed read or an unexpected reply fails the attempt, and [`negotiate`] moves on
//! to the other protocol on the same stream.

use std::{
    fmt,
    io::{Read, Write},
    net::IpAddr,
};

use crate::{
    error::HandshakeError,
    selector::{RedirectTarget, TargetHost},
};

/// Upper bound of the single read that receives the HTTP CONNECT response.
pub const HTTP_RESPONSE_LIMIT: usize = 1023;

const SOCKS5_VERSION: u8 = 0x05;
const SOCKS5_NO_AUTH: u8 = 0x00;
const SOCKS5_CMD_CONNECT: u8 = 0x01;
const SOCKS5_REPLY_SUCCEEDED: u8 = 0x00;

pub const SOCKS5_ATYP_IPV4: u8 = 0x01;
pub const SOCKS5_ATYP_DOMAIN: u8 = 0x03;
pub const SOCKS5_ATYP_IPV6: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyProtocol {
    Http,
    Socks5,
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyProtocol::Http => f.write_str("HTTP CONNECT"),
            ProxyProtocol::Socks5 => f.write_str("SOCKS5"),
        }
    }
}

/// The HTTP/1.1 CONNECT request for `target`. The `Host` header carries the host alone.
pub fn build_http_request(target: &RedirectTarget) -> String {
    let authority = target.authority();
    let host = match &target.host {
        TargetHost::Ip(IpAddr::V6(ip)) => format!("[{ip}]"),
        host => host.to_string(),
    };

    format!("CONNECT {authority} HTTP/1.1\r\nHost: {host}\r\n\r\n")
}

/// Sends an HTTP CONNECT and reads the answer with a single bounded read.
///
/// The tunnel is up when the status code of the response is `200`.
#[tracing::instrument(level = "debug", skip(stream), err)]
pub fn http_connect<S: Read + Write>(
    stream: &mut S,
    target: &RedirectTarget,
) -> Result<(), HandshakeError> {
    let io_error = HandshakeError::io(ProxyProtocol::Http);

    stream
        .write_all(build_http_request(target).as_bytes())
        .map_err(io_error)?;

    let mut response = [0u8; HTTP_RESPONSE_LIMIT];
    let read = stream
        .read(&mut response)
        .map_err(HandshakeError::io(ProxyProtocol::Http))?;
    if read == 0 {
        return Err(HandshakeError::Closed(ProxyProtocol::Http));
    }

    let response = String::from_utf8_lossy(&response[..read]);
    let status_line = response.lines().next().unwrap_or_default();

    match status_line.split_whitespace().nth(1) {
        Some("200") => Ok(()),
        _ => Err(HandshakeError::HttpStatus(status_line.to_string())),
    }
}

/// The SOCKS5 CONNECT request for `target`.
///
/// IPv4 and IPv6 literals are sent as addresses, hostnames as `ATYP_DOMAIN` with a length
/// prefix (so they can't be longer than 255 bytes).
pub fn build_socks5_request(target: &RedirectTarget) -> Result<Vec<u8>, HandshakeError> {
    let mut request = vec![SOCKS5_VERSION, SOCKS5_CMD_CONNECT, 0x00];

    match &target.host {
        TargetHost::Ip(IpAddr::V4(ip)) => {
            request.push(SOCKS5_ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        TargetHost::Ip(IpAddr::V6(ip)) => {
            request.push(SOCKS5_ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        TargetHost::Name(name) => {
            let length = u8::try_from(name.len())
                .map_err(|_| HandshakeError::HostnameTooLong(name.len()))?;
            request.push(SOCKS5_ATYP_DOMAIN);
            request.push(length);
            request.extend_from_slice(name.as_bytes());
        }
    }

    request.extend_from_slice(&target.port.to_be_bytes());
    Ok(request)
}

fn read_exact_or_closed<S: Read>(stream: &mut S, buf: &mut [u8]) -> Result<(), HandshakeError> {
    let mut filled = 0;

    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(HandshakeError::Closed(ProxyProtocol::Socks5)),
            Ok(read) => filled += read,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(HandshakeError::io(ProxyProtocol::Socks5)(error)),
        }
    }

    Ok(())
}

/// Unauthenticated SOCKS5 CONNECT.
///
/// The whole reply, including the bound address, is consumed so that the stream is left at the
/// first byte of tunnelled data.
#[tracing::instrument(level = "debug", skip(stream), err)]
pub fn socks5_connect<S: Read + Write>(
    stream: &mut S,
    target: &RedirectTarget,
) -> Result<(), HandshakeError> {
    let request = build_socks5_request(target)?;

    stream
        .write_all(&[SOCKS5_VERSION, 0x01, SOCKS5_NO_AUTH])
        .map_err(HandshakeError::io(ProxyProtocol::Socks5))?;

    let mut greeting = [0u8; 2];
    read_exact_or_closed(stream, &mut greeting)?;
    match greeting {
        [SOCKS5_VERSION, SOCKS5_NO_AUTH] => {}
        [SOCKS5_VERSION, method] => return Err(HandshakeError::Socks5Method(method)),
        [version, _] => return Err(HandshakeError::Socks5Version(version)),
    }

    stream
        .write_all(&request)
        .map_err(HandshakeError::io(ProxyProtocol::Socks5))?;

    // VER REP RSV ATYP
    let mut header = [0u8; 4];
    read_exact_or_closed(stream, &mut header)?;
    let [version, reply, _, address_type] = header;

    if version != SOCKS5_VERSION {
        return Err(HandshakeError::Socks5Version(version));
    }
    if reply != SOCKS5_REPLY_SUCCEEDED {
        return Err(HandshakeError::Socks5Reply(reply));
    }

    let address_length = match address_type {
        SOCKS5_ATYP_IPV4 => 4,
        SOCKS5_ATYP_IPV6 => 16,
        SOCKS5_ATYP_DOMAIN => {
            let mut length = [0u8; 1];
            read_exact_or_closed(stream, &mut length)?;
            usize::from(length[0])
        }
        other => return Err(HandshakeError::Socks5AddressType(other)),
    };

    // BND.ADDR BND.PORT
    let mut bound = vec![0u8; address_length + 2];
    read_exact_or_closed(stream, &mut bound)?;

    Ok(())
}

/// HTTP CONNECT, then SOCKS5 on the same stream if HTTP failed.
///
/// The order is fixed whatever the proxy was declared as, a SOCKS5 greeting in front of an
/// HTTP request would spoil it for an HTTP-only proxy.
#[tracing::instrument(level = "debug", skip(stream), ret, err)]
pub fn negotiate<S: Read + Write>(
    stream: &mut S,
    target: &RedirectTarget,
) -> Result<ProxyProtocol, HandshakeError> {
    let first = match http_connect(stream, target) {
        Ok(()) => return Ok(ProxyProtocol::Http),
        Err(error) => error,
    };
    tracing::debug!(%first, "HTTP CONNECT failed, trying SOCKS5");

    match socks5_connect(stream, target) {
        Ok(()) => Ok(ProxyProtocol::Socks5),
        Err(second) => Err(HandshakeError::Negotiation {
            first_protocol: ProxyProtocol::Http,
            first: Box::new(first),
            second_protocol: ProxyProtocol::Socks5,
            second: Box::new(second),
        }),
    }
}
