//! Parsing of the current user's system proxy string.
//!
//! The string is what Windows stores for the IE/WinINet proxy, for example:
//!
//! - `127.0.0.1:7890`
//! - `http=127.0.0.1:7890;https=127.0.0.1:7890`
//! - `socks=127.0.0.1:1080`
//! - `http://proxy.corp:3128`
//!
//! Only the first `;` separated entry is used. Reading the string from the OS is done by the
//! platform layer.

use std::str::FromStr;

use crate::{config::ConfigError, proxy::ProtocolHint};

/// One parsed entry of the system proxy string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemProxy {
    pub host: String,
    pub port: u16,
    /// Set when the entry label or scheme names the protocol (`socks=`, `socks5://`, ...).
    pub hint: Option<ProtocolHint>,
}

impl FromStr for SystemProxy {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidProxy(raw.to_string());

        let entry = raw.split(';').next().unwrap_or_default().trim();

        let (label, entry) = match entry.split_once('=') {
            Some((label, rest)) => (Some(label.trim()), rest.trim()),
            None => (None, entry),
        };

        let (scheme, entry) = match entry.split_once("://") {
            Some((scheme, rest)) => (Some(scheme), rest),
            None => (None, entry),
        };
        let entry = entry.trim_end_matches('/');

        let (host, port) = entry.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        if host.is_empty() || port == 0 {
            return Err(invalid());
        }

        let hint = scheme
            .or(label)
            .and_then(|name| name.parse::<ProtocolHint>().ok());

        Ok(SystemProxy {
            host: host.to_string(),
            port,
            hint,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("127.0.0.1:7890", "127.0.0.1", 7890, None)]
    #[case(
        "http=127.0.0.1:7890;https=127.0.0.1:7891",
        "127.0.0.1",
        7890,
        Some(ProtocolHint::Http)
    )]
    #[case("socks=10.1.1.1:1080", "10.1.1.1", 1080, Some(ProtocolHint::Socks5))]
    #[case("http://proxy.corp:3128", "proxy.corp", 3128, Some(ProtocolHint::Http))]
    #[case(
        "https=socks5://proxy.corp:1080/",
        "proxy.corp",
        1080,
        Some(ProtocolHint::Socks5)
    )]
    #[case("[::1]:8080", "::1", 8080, None)]
    #[case("  127.0.0.1:8080 ; ", "127.0.0.1", 8080, None)]
    fn parse(
        #[case] raw: &str,
        #[case] host: &str,
        #[case] port: u16,
        #[case] hint: Option<ProtocolHint>,
    ) {
        let parsed = raw.parse::<SystemProxy>().unwrap();

        assert_eq!(
            parsed,
            SystemProxy {
                host: host.to_string(),
                port,
                hint
            }
        );
    }

    #[rstest]
    #[case("")]
    #[case("127.0.0.1")]
    #[case(":8080")]
    #[case("127.0.0.1:0")]
    #[case("127.0.0.1:http")]
    #[case("127.0.0.1:70000")]
    fn parse_invalid(#[case] raw: &str) {
        assert!(matches!(
            raw.parse::<SystemProxy>(),
            Err(ConfigError::InvalidProxy(_))
        ));
    }
}
