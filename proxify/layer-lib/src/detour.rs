//! The intercepts use the types in this module to decide whether to call the original function.
//!
//! [`Detour`] is what the redirection logic returns to an intercept: either a value, the special
//! [`Bypass`] case (call the original function with the original arguments), or a hard
//! [`RedirectError`] that must be reported to the application.

use std::{fmt, net::SocketAddr};

use crate::error::RedirectError;

/// Soft-errors that can be recovered from by calling the original function.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bypass {
    /// `127.0.0.0/8` or `::1`.
    Loopback(SocketAddr),

    /// Plain DNS (port 53) on any address family.
    DnsPort(SocketAddr),

    /// Port 443 on one of the configured encrypted DNS provider prefixes.
    EncryptedDns(SocketAddr),

    /// No usable proxy is configured, the layer is in pass-through mode.
    ProxyDisabled,

    /// IPv6 destination while IPv6 is configured to go direct.
    Ipv6Direct(SocketAddr),

    /// The socket is not a stream socket (its type is carried).
    NotStream(i32),

    /// A conversion from a raw socket address failed.
    AddressConversion,

    /// The layer has not finished initializing, or is being unloaded.
    NotInitialized,

    /// Name resolution for a name that must stay local (`localhost`, `127.*`, literals).
    LocalHostname,

    /// Called a resolver intercept with a null or empty node name.
    NullNode,

    /// No fake address left for a new hostname.
    FakeIpExhausted,
}

impl fmt::Display for Bypass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bypass::Loopback(addr) => write!(f, "loopback destination {addr}"),
            Bypass::DnsPort(addr) => write!(f, "DNS destination {addr}"),
            Bypass::EncryptedDns(addr) => write!(f, "encrypted DNS provider {addr}"),
            Bypass::ProxyDisabled => f.write_str("proxy disabled"),
            Bypass::Ipv6Direct(addr) => write!(f, "IPv6 destination {addr} goes direct"),
            Bypass::NotStream(kind) => write!(f, "socket type {kind} is not a stream"),
            Bypass::AddressConversion => f.write_str("unsupported socket address"),
            Bypass::NotInitialized => f.write_str("layer not initialized"),
            Bypass::LocalHostname => f.write_str("local hostname"),
            Bypass::NullNode => f.write_str("null node name"),
            Bypass::FakeIpExhausted => f.write_str("fake address range exhausted"),
        }
    }
}

/// Result-like type for the redirection logic.
#[derive(Debug)]
pub enum Detour<S = ()> {
    /// Equivalent to `Result::Ok`
    Success(S),
    /// Call the original function, untouched.
    Bypass(Bypass),
    /// Equivalent to `Result::Err`
    Error(RedirectError),
}

impl<S> Detour<S> {
    /// Calls `op` if the result is `Success`, otherwise returns the `Bypass` or `Error` value of
    /// self.
    pub fn and_then<U, F: FnOnce(S) -> Detour<U>>(self, op: F) -> Detour<U> {
        match self {
            Detour::Success(s) => op(s),
            Detour::Bypass(b) => Detour::Bypass(b),
            Detour::Error(e) => Detour::Error(e),
        }
    }

    /// Maps a `Detour<S>` to `Detour<U>` by applying a function to a contained `Success` value,
    /// leaving a `Bypass` or `Error` value untouched.
    pub fn map<U, F: FnOnce(S) -> U>(self, op: F) -> Detour<U> {
        match self {
            Detour::Success(s) => Detour::Success(op(s)),
            Detour::Bypass(b) => Detour::Bypass(b),
            Detour::Error(e) => Detour::Error(e),
        }
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, Detour::Bypass(_))
    }

    /// Helper for returning from an intercept.
    ///
    /// - `Success` -> `success`
    /// - `Bypass` -> `bypass`, usually a call to the original function
    /// - `Error` -> `error`, usually setting the last error and returning the failure value
    pub fn unwrap_or_bypass_with<T>(
        self,
        success: impl FnOnce(S) -> T,
        bypass: impl FnOnce(Bypass) -> T,
        error: impl FnOnce(RedirectError) -> T,
    ) -> T {
        match self {
            Detour::Success(s) => success(s),
            Detour::Bypass(b) => bypass(b),
            Detour::Error(e) => error(e),
        }
    }
}

impl<S> From<Result<S, RedirectError>> for Detour<S> {
    fn from(result: Result<S, RedirectError>) -> Self {
        match result {
            Ok(s) => Detour::Success(s),
            Err(e) => Detour::Error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::BlockReason;

    #[test]
    fn map_and_then_keep_bypass_and_error() {
        let bypass: Detour<u8> = Detour::Bypass(Bypass::ProxyDisabled);
        assert!(bypass.map(|v| v + 1).is_bypass());

        let error: Detour<u8> = Detour::Error(RedirectError::PolicyBlock(BlockReason::Ipv6));
        let chained = error.and_then(|v| Detour::Success(v + 1));
        assert!(matches!(
            chained,
            Detour::Error(RedirectError::PolicyBlock(BlockReason::Ipv6))
        ));

        let success = Detour::Success(1u8).and_then(|v| Detour::Success(v * 10));
        assert_eq!(success.unwrap_or_bypass_with(|v| v, |_| 0, |_| 255), 10);
    }
}
