use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{config::ConfigError, system::SystemProxy};

/// Default receive timeout for each read of the proxy handshake.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// The CONNECT dialect the proxy is declared as.
///
/// Only recorded and logged. The handshake always tries HTTP CONNECT first and SOCKS5 after it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolHint {
    #[default]
    Http,
    Socks5,
}

impl FromStr for ProtocolHint {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(Self::Http),
            "socks" | "socks5" | "socks5h" => Ok(Self::Socks5),
            _ => Err(ConfigError::UnknownVariant(
                value.to_string(),
                "`http`, `socks5`",
            )),
        }
    }
}

impl fmt::Display for ProtocolHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Socks5 => f.write_str("socks5"),
        }
    }
}

/// What happens to TCP connections whose destination is a (non loopback) IPv6 address.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ipv6Mode {
    /// Tunnel through the proxy like IPv4 traffic.
    #[default]
    Proxy,
    /// Connect directly, without the proxy.
    Direct,
    /// Fail the connect with "address family not supported", so the application falls back to
    /// IPv4.
    Block,
}

impl FromStr for Ipv6Mode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "proxy" => Ok(Self::Proxy),
            "direct" => Ok(Self::Direct),
            "block" => Ok(Self::Block),
            _ => Err(ConfigError::UnknownVariant(
                value.to_string(),
                "`proxy`, `direct`, `block`",
            )),
        }
    }
}

impl fmt::Display for Ipv6Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proxy => f.write_str("proxy"),
            Self::Direct => f.write_str("direct"),
            Self::Block => f.write_str("block"),
        }
    }
}

/// The upstream proxy and the policy knobs that go with it.
///
/// `enabled` is derived: it is `true` exactly when `host` is non-empty and `port` is non-zero.
/// Construct through [`ProxyConfig::new`] or [`ProxyConfig::disabled`] to keep it that way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyConfig {
    host: String,
    port: u16,
    enabled: bool,
    pub protocol_hint: ProtocolHint,
    pub ipv6_mode: Ipv6Mode,
    pub timeout_ms: u64,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let enabled = !host.is_empty() && port > 0;

        Self {
            host,
            port,
            enabled,
            protocol_hint: ProtocolHint::default(),
            ipv6_mode: Ipv6Mode::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Pass-through mode, every classification short-circuits to a bypass.
    pub fn disabled() -> Self {
        Self::new(String::new(), 0)
    }

    pub fn with_protocol_hint(mut self, hint: ProtocolHint) -> Self {
        self.protocol_hint = hint;
        self
    }

    pub fn with_ipv6_mode(mut self, mode: Ipv6Mode) -> Self {
        self.ipv6_mode = mode;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Handshake receive timeout. A zero value is clamped to one millisecond, since a zero
    /// duration means "no timeout" for most socket APIs.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

impl From<SystemProxy> for ProxyConfig {
    fn from(proxy: SystemProxy) -> Self {
        let config = ProxyConfig::new(proxy.host, proxy.port);

        match proxy.hint {
            Some(hint) => config.with_protocol_hint(hint),
            None => config,
        }
    }
}

impl FromStr for ProxyConfig {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.parse::<SystemProxy>().map(ProxyConfig::from)
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.enabled {
            return f.write_str("disabled");
        }

        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)?;
        } else {
            write!(f, "{}:{}", self.host, self.port)?;
        }

        write!(
            f,
            " (prefer {}, ipv6 {}, timeout {}ms)",
            self.protocol_hint, self.ipv6_mode, self.timeout_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("127.0.0.1", 8080, true)]
    #[case("", 8080, false)]
    #[case("127.0.0.1", 0, false)]
    #[case("", 0, false)]
    fn enabled_iff_host_and_port(#[case] host: &str, #[case] port: u16, #[case] enabled: bool) {
        assert_eq!(ProxyConfig::new(host, port).is_enabled(), enabled);
    }

    #[rstest]
    fn defaults() {
        let config = ProxyConfig::new("proxy.local", 3128);

        assert_eq!(config.protocol_hint, ProtocolHint::Http);
        assert_eq!(config.ipv6_mode, Ipv6Mode::Proxy);
        assert_eq!(config.timeout(), Duration::from_millis(5000));
        assert!(!ProxyConfig::default().is_enabled());
    }

    #[rstest]
    #[case("proxy", Ipv6Mode::Proxy)]
    #[case("Direct", Ipv6Mode::Direct)]
    #[case("BLOCK", Ipv6Mode::Block)]
    fn ipv6_mode_from_str(#[case] raw: &str, #[case] expected: Ipv6Mode) {
        assert_eq!(raw.parse::<Ipv6Mode>().unwrap(), expected);
    }

    #[rstest]
    fn ipv6_mode_rejects_unknown() {
        assert!(matches!(
            "tunnel".parse::<Ipv6Mode>(),
            Err(ConfigError::UnknownVariant(value, _)) if value == "tunnel"
        ));
    }

    #[rstest]
    fn parses_labelled_socks_proxy() {
        let config: ProxyConfig = "socks=10.0.0.1:1080".parse().unwrap();

        assert_eq!(config.host(), "10.0.0.1");
        assert_eq!(config.port(), 1080);
        assert_eq!(config.protocol_hint, ProtocolHint::Socks5);
        assert!(config.is_enabled());
    }

    #[rstest]
    fn display_brackets_ipv6_host() {
        let config = ProxyConfig::new("::1", 8080);

        assert!(config.to_string().starts_with("[::1]:8080"));
        assert_eq!(ProxyConfig::disabled().to_string(), "disabled");
    }
}
