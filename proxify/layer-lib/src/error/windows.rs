//! Module responsible for handling Windows errors.

use std::fmt::{Debug, Display};

use winapi::{
    shared::ntdef::{MAKELANGID, SUBLANG_ENGLISH_US},
    um::{
        errhandlingapi::GetLastError,
        winbase::{FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS, FormatMessageW},
        winnt::LANG_ENGLISH,
        winsock2::{WSAEAFNOSUPPORT, WSAECONNREFUSED, WSAECONNRESET},
    },
};

use super::RedirectError;
use crate::{selector::BlockReason, str_win::u16_buffer_to_string};

pub struct WindowsError {
    /// Usually returned by [`GetLastError`].
    error: u32,
}

impl WindowsError {
    pub fn new(error: u32) -> Self {
        Self { error }
    }

    /// Generate a new [`WindowsError`] from [`GetLastError`].
    pub fn last_error() -> Self {
        let error = unsafe { GetLastError() };
        Self { error }
    }

    pub fn get_error(&self) -> u32 {
        self.error
    }

    /// Returns an en-US string of a Windows system error code.
    pub fn format_windows_error_code(error: u32) -> Option<String> {
        let mut buf: [u16; 256] = [0; 256];

        let english_us = MAKELANGID(LANG_ENGLISH, SUBLANG_ENGLISH_US);

        // Returns the number of `TCHAR`s written, zero on failure.
        let ret = unsafe {
            FormatMessageW(
                FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
                std::ptr::null(),
                error,
                english_us as _,
                buf.as_mut_ptr(),
                buf.len() as _,
                std::ptr::null_mut(),
            )
        };
        if ret == 0 {
            return None;
        }

        Some(u16_buffer_to_string(buf).trim_ascii().to_string())
    }

    pub fn get_formatted_error(&self) -> Option<String> {
        Self::format_windows_error_code(self.error)
    }
}

impl From<u32> for WindowsError {
    fn from(val: u32) -> Self {
        WindowsError::new(val)
    }
}

impl Display for WindowsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get_formatted_error() {
            Some(message) => write!(f, "{message} ({})", self.error),
            None => write!(f, "unknown Windows error {}", self.error),
        }
    }
}

impl Debug for WindowsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl RedirectError {
    /// The `WSAGetLastError` value the application sees for this failure.
    pub fn wsa_error_code(&self) -> i32 {
        match self {
            RedirectError::PolicyBlock(BlockReason::Ipv6) => WSAEAFNOSUPPORT,
            RedirectError::PolicyBlock(BlockReason::UdpPort(_)) => WSAECONNRESET,
            RedirectError::ProxyUnreachable { source, .. } | RedirectError::Socket(source) => {
                source.raw_os_error().unwrap_or(WSAECONNREFUSED)
            }
            RedirectError::NoProxyRoute(_) | RedirectError::HandshakeFailed(_) => WSAECONNREFUSED,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use rstest::rstest;
    use winapi::um::winsock2::WSAETIMEDOUT;

    use super::*;
    use crate::{error::HandshakeError, handshake::ProxyProtocol};

    #[rstest]
    #[case(RedirectError::PolicyBlock(BlockReason::Ipv6), WSAEAFNOSUPPORT)]
    #[case(RedirectError::PolicyBlock(BlockReason::UdpPort(443)), WSAECONNRESET)]
    #[case(
        RedirectError::ProxyUnreachable {
            addr: "127.0.0.1:8080".parse().unwrap(),
            source: io::Error::from_raw_os_error(WSAETIMEDOUT),
        },
        WSAETIMEDOUT
    )]
    #[case(
        RedirectError::ProxyUnreachable {
            addr: "127.0.0.1:8080".parse().unwrap(),
            source: io::Error::other("synthetic"),
        },
        WSAECONNREFUSED
    )]
    #[case(
        RedirectError::HandshakeFailed(HandshakeError::Closed(ProxyProtocol::Http)),
        WSAECONNREFUSED
    )]
    fn wsa_codes(#[case] error: RedirectError, #[case] expected: i32) {
        assert_eq!(error.wsa_error_code(), expected);
    }

    #[rstest]
    fn formats_known_error() {
        // ERROR_FILE_NOT_FOUND
        let error = WindowsError::new(2);

        assert!(error.get_formatted_error().is_some());
        assert!(error.to_string().ends_with("(2)"));
    }
}
