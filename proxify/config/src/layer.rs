use std::{fs, net::Ipv6Addr, path::Path};

use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};

use crate::{
    PROXIFY_CONFIG_FILE_ENV, PROXIFY_DISABLE_ENV, PROXIFY_DNS_BYPASS_ENV, PROXIFY_IPV6_MODE_ENV,
    PROXIFY_PROXY_ENV, PROXIFY_PROXY_PROTOCOL_ENV, PROXIFY_TIMEOUT_MS_ENV,
    PROXIFY_UDP_BLOCKED_PORTS_ENV,
    config::{
        Result,
        from_env::{CommaSeparated, FromEnv},
        source::ConfigSource,
    },
    proxy::{DEFAULT_TIMEOUT_MS, Ipv6Mode, ProtocolHint, ProxyConfig},
};

/// UDP destination ports that are rejected by default (DNS and QUIC).
pub const DEFAULT_UDP_BLOCKED_PORTS: [u16; 2] = [53, 443];

const GOOGLE_PUBLIC_DNS: Ipv6Addr = Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0);

/// Google Public DNS, whose DNS-over-HTTPS endpoints are never redirected.
pub fn default_dns_bypass() -> Vec<Ipv6Net> {
    Ipv6Net::new(GOOGLE_PUBLIC_DNS, 48).into_iter().collect()
}

/// Everything the layer needs to know, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerConfig {
    pub proxy: ProxyConfig,

    /// IPv6 prefixes of encrypted DNS providers; port 443 traffic to these is left alone.
    pub dns_bypass: Vec<Ipv6Net>,

    /// UDP destination ports rejected with "connection reset" while the proxy is enabled.
    pub udp_blocked_ports: Vec<u16>,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::disabled(),
            dns_bypass: default_dns_bypass(),
            udp_blocked_ports: DEFAULT_UDP_BLOCKED_PORTS.to_vec(),
        }
    }
}

/// On-disk configuration, every field is optional.
///
/// ```json
/// {
///   "proxy": "127.0.0.1:7890",
///   "protocol": "socks5",
///   "ipv6_mode": "block",
///   "timeout_ms": 3000,
///   "dns_bypass": ["2001:4860:4860::/48"],
///   "udp_blocked_ports": [53, 443, 3478]
/// }
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LayerFileConfig {
    pub proxy: Option<String>,
    pub protocol: Option<ProtocolHint>,
    pub ipv6_mode: Option<Ipv6Mode>,
    pub timeout_ms: Option<u64>,
    pub dns_bypass: Option<Vec<Ipv6Net>>,
    pub udp_blocked_ports: Option<Vec<u16>>,
    pub disabled: Option<bool>,
}

impl LayerFileConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Reads the file named by [`PROXIFY_CONFIG_FILE_ENV`], or the empty config when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(PROXIFY_CONFIG_FILE_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_path(path.trim()),
            _ => Ok(Self::default()),
        }
    }
}

impl LayerConfig {
    /// Resolves the configuration from the system proxy string, the configuration file and the
    /// environment, in increasing priority.
    pub fn resolve(system_proxy: Option<&str>) -> Result<Self> {
        let file = LayerFileConfig::from_env()?;
        Self::resolve_with(system_proxy, file)
    }

    pub fn resolve_with(system_proxy: Option<&str>, file: LayerFileConfig) -> Result<Self> {
        let system = system_proxy.and_then(|raw| match raw.parse::<ProxyConfig>() {
            Ok(proxy) => Some(proxy),
            Err(error) => {
                tracing::warn!(%error, "ignoring unusable system proxy setting");
                None
            }
        });

        let file_proxy = file
            .proxy
            .as_deref()
            .map(str::parse::<ProxyConfig>)
            .transpose()?;

        let base = FromEnv::<ProxyConfig>::new(PROXIFY_PROXY_ENV)
            .or(file_proxy)
            .or(system)
            .source_value()
            .transpose()?
            .unwrap_or_default();

        let disabled = FromEnv::<bool>::new(PROXIFY_DISABLE_ENV)
            .or(file.disabled)
            .source_value()
            .transpose()?
            .unwrap_or(false);

        let mut proxy = if disabled {
            ProxyConfig::disabled()
        } else {
            ProxyConfig::new(base.host(), base.port())
        };

        proxy.protocol_hint = FromEnv::<ProtocolHint>::new(PROXIFY_PROXY_PROTOCOL_ENV)
            .or(file.protocol)
            .source_value()
            .transpose()?
            .unwrap_or(base.protocol_hint);

        proxy.ipv6_mode = FromEnv::<Ipv6Mode>::new(PROXIFY_IPV6_MODE_ENV)
            .or(file.ipv6_mode)
            .source_value()
            .transpose()?
            .unwrap_or_default();

        proxy.timeout_ms = FromEnv::<u64>::new(PROXIFY_TIMEOUT_MS_ENV)
            .or(file.timeout_ms)
            .source_value()
            .transpose()?
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        let dns_bypass = FromEnv::<CommaSeparated<Ipv6Net>>::new(PROXIFY_DNS_BYPASS_ENV)
            .or(file.dns_bypass.map(CommaSeparated))
            .source_value()
            .transpose()?
            .map(|CommaSeparated(prefixes)| prefixes)
            .unwrap_or_else(default_dns_bypass);

        let udp_blocked_ports = FromEnv::<CommaSeparated<u16>>::new(PROXIFY_UDP_BLOCKED_PORTS_ENV)
            .or(file.udp_blocked_ports.map(CommaSeparated))
            .source_value()
            .transpose()?
            .map(|CommaSeparated(ports)| ports)
            .unwrap_or_else(|| DEFAULT_UDP_BLOCKED_PORTS.to_vec());

        Ok(LayerConfig {
            proxy,
            dns_bypass,
            udp_blocked_ports,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;

    use super::*;
    use crate::{config::ConfigError, util::testing::with_env_vars};

    const ALL_ENV: [&str; 8] = [
        PROXIFY_CONFIG_FILE_ENV,
        PROXIFY_PROXY_ENV,
        PROXIFY_PROXY_PROTOCOL_ENV,
        PROXIFY_IPV6_MODE_ENV,
        PROXIFY_TIMEOUT_MS_ENV,
        PROXIFY_DNS_BYPASS_ENV,
        PROXIFY_UDP_BLOCKED_PORTS_ENV,
        PROXIFY_DISABLE_ENV,
    ];

    fn clean_env<'a>(overrides: Vec<(&'a str, Option<&'a str>)>) -> Vec<(&'a str, Option<&'a str>)> {
        let mut vars: Vec<(&str, Option<&str>)> = ALL_ENV
            .iter()
            .filter(|name| !overrides.iter().any(|(key, _)| key == *name))
            .map(|name| (*name, None))
            .collect();
        vars.extend(overrides);
        vars
    }

    #[rstest]
    fn nothing_configured_is_pass_through() {
        with_env_vars(clean_env(vec![]), || {
            let config = LayerConfig::resolve(None).unwrap();

            assert_eq!(config, LayerConfig::default());
            assert!(!config.proxy.is_enabled());
        });
    }

    #[rstest]
    fn system_proxy_is_used() {
        with_env_vars(clean_env(vec![]), || {
            let config = LayerConfig::resolve(Some("socks=127.0.0.1:1080")).unwrap();

            assert_eq!(config.proxy.host(), "127.0.0.1");
            assert_eq!(config.proxy.port(), 1080);
            assert_eq!(config.proxy.protocol_hint, ProtocolHint::Socks5);
            assert_eq!(config.udp_blocked_ports, vec![53, 443]);
        });
    }

    #[rstest]
    fn garbage_system_proxy_is_ignored() {
        with_env_vars(clean_env(vec![]), || {
            let config = LayerConfig::resolve(Some("not a proxy")).unwrap();

            assert!(!config.proxy.is_enabled());
        });
    }

    #[rstest]
    fn env_overrides_system() {
        with_env_vars(
            clean_env(vec![
                (PROXIFY_PROXY_ENV, Some("10.0.0.2:3128")),
                (PROXIFY_IPV6_MODE_ENV, Some("block")),
                (PROXIFY_TIMEOUT_MS_ENV, Some("250")),
                (PROXIFY_UDP_BLOCKED_PORTS_ENV, Some("53")),
            ]),
            || {
                let config = LayerConfig::resolve(Some("127.0.0.1:7890")).unwrap();

                assert_eq!(config.proxy.host(), "10.0.0.2");
                assert_eq!(config.proxy.port(), 3128);
                assert_eq!(config.proxy.ipv6_mode, Ipv6Mode::Block);
                assert_eq!(config.proxy.timeout_ms, 250);
                assert_eq!(config.udp_blocked_ports, vec![53]);
            },
        );
    }

    #[rstest]
    fn file_sits_between_env_and_system() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"proxy": "192.168.1.1:8080", "ipv6_mode": "direct", "protocol": "socks5", "dns_bypass": ["2606:4700:4700::/48"]}}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        with_env_vars(
            clean_env(vec![
                (PROXIFY_CONFIG_FILE_ENV, Some(path.as_str())),
                (PROXIFY_IPV6_MODE_ENV, Some("proxy")),
            ]),
            || {
                let config = LayerConfig::resolve(Some("127.0.0.1:7890")).unwrap();

                assert_eq!(config.proxy.host(), "192.168.1.1");
                assert_eq!(config.proxy.protocol_hint, ProtocolHint::Socks5);
                assert_eq!(config.proxy.ipv6_mode, Ipv6Mode::Proxy);
                assert_eq!(
                    config.dns_bypass,
                    vec!["2606:4700:4700::/48".parse::<Ipv6Net>().unwrap()]
                );
            },
        );
    }

    #[rstest]
    fn disable_wins() {
        with_env_vars(
            clean_env(vec![
                (PROXIFY_PROXY_ENV, Some("10.0.0.2:3128")),
                (PROXIFY_DISABLE_ENV, Some("true")),
            ]),
            || {
                let config = LayerConfig::resolve(None).unwrap();

                assert!(!config.proxy.is_enabled());
            },
        );
    }

    #[rstest]
    fn invalid_env_value_is_reported() {
        with_env_vars(
            clean_env(vec![(PROXIFY_TIMEOUT_MS_ENV, Some("soon"))]),
            || {
                let result = LayerConfig::resolve(None);

                assert!(matches!(
                    result,
                    Err(ConfigError::InvalidValue(value, PROXIFY_TIMEOUT_MS_ENV)) if value == "soon"
                ));
            },
        );
    }

    #[rstest]
    fn unknown_file_field_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"upstream": "127.0.0.1:1"}}"#).unwrap();

        assert!(matches!(
            LayerFileConfig::from_path(file.path()),
            Err(ConfigError::SerdeJson(_))
        ));
    }
}
