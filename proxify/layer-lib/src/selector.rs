//! Classification of outbound TCP destinations.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use proxify_config::{Ipv6Mode, LayerConfig};

use crate::{detour::Bypass, fakeip::FakeIpTable};

/// Why a call was refused without touching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockReason {
    /// IPv6 destination while IPv6 is configured to be blocked.
    Ipv6,
    /// UDP datagram to a port the layer refuses to let through.
    UdpPort(u16),
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Ipv6 => f.write_str("IPv6 is blocked"),
            BlockReason::UdpPort(port) => write!(f, "UDP to port {port} is blocked"),
        }
    }
}

/// Host part of the destination sent to the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetHost {
    /// Recovered from a fake address, resolved by the proxy.
    Name(String),
    Ip(IpAddr),
}

impl fmt::Display for TargetHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetHost::Name(name) => f.write_str(name),
            TargetHost::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

/// Where the proxy should connect us to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RedirectTarget {
    pub host: TargetHost,
    pub port: u16,
}

impl RedirectTarget {
    pub fn name(name: impl Into<String>, port: u16) -> Self {
        Self {
            host: TargetHost::Name(name.into()),
            port,
        }
    }

    pub fn ip(ip: IpAddr, port: u16) -> Self {
        Self {
            host: TargetHost::Ip(ip),
            port,
        }
    }

    /// `host:port`, with IPv6 literals in brackets.
    pub fn authority(&self) -> String {
        match &self.host {
            TargetHost::Ip(IpAddr::V6(ip)) => format!("[{ip}]:{}", self.port),
            host => format!("{host}:{}", self.port),
        }
    }
}

impl fmt::Display for RedirectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectDecision {
    Bypass(Bypass),
    Block(BlockReason),
    Redirect(RedirectTarget),
}

/// Unwraps `::ffff:a.b.c.d` so dual-stack sockets are classified like IPv4 ones.
pub fn canonical_addr(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), v6.port()),
            None => addr,
        },
        SocketAddr::V4(_) => addr,
    }
}

pub fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6 == Ipv6Addr::LOCALHOST,
    }
}

/// Decides, for every outbound TCP connect, whether it goes to the proxy.
///
/// Rules, first match wins:
///
/// 1. IPv4 loopback (`127.0.0.0/8`) is bypassed;
/// 2. IPv6 loopback (`::1`) is bypassed;
/// 3. port 53 is bypassed;
/// 4. IPv6 port 443 inside one of the encrypted DNS prefixes is bypassed;
/// 5. everything is bypassed while the proxy is disabled;
/// 6. IPv6 is blocked when [`Ipv6Mode::Block`];
/// 7. IPv6 is bypassed when [`Ipv6Mode::Direct`];
/// 8. the rest is redirected, fake addresses are replaced by their hostname.
///
/// IPv4-mapped destinations (`::ffff:a.b.c.d`) are classified as the IPv4 address they carry, for
/// every rule. They are therefore never subject to [`Ipv6Mode`]: a dual-stack socket reaching an
/// IPv4 host is redirected even under [`Ipv6Mode::Block`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectSelector<'a> {
    config: &'a LayerConfig,
    fake_ips: &'a FakeIpTable,
}

impl<'a> ConnectSelector<'a> {
    pub fn new(config: &'a LayerConfig, fake_ips: &'a FakeIpTable) -> Self {
        Self { config, fake_ips }
    }

    pub fn classify(&self, addr: SocketAddr) -> ConnectDecision {
        let addr = canonical_addr(addr);

        if is_loopback(addr.ip()) {
            return ConnectDecision::Bypass(Bypass::Loopback(addr));
        }

        if addr.port() == 53 {
            return ConnectDecision::Bypass(Bypass::DnsPort(addr));
        }

        if let IpAddr::V6(ip) = addr.ip() {
            if addr.port() == 443 && self.is_encrypted_dns(ip) {
                return ConnectDecision::Bypass(Bypass::EncryptedDns(addr));
            }
        }

        let proxy = &self.config.proxy;
        if !proxy.is_enabled() {
            return ConnectDecision::Bypass(Bypass::ProxyDisabled);
        }

        match addr.ip() {
            IpAddr::V6(_) => match proxy.ipv6_mode {
                Ipv6Mode::Block => ConnectDecision::Block(BlockReason::Ipv6),
                Ipv6Mode::Direct => ConnectDecision::Bypass(Bypass::Ipv6Direct(addr)),
                Ipv6Mode::Proxy => ConnectDecision::Redirect(RedirectTarget::ip(addr.ip(), addr.port())),
            },
            IpAddr::V4(ip) => ConnectDecision::Redirect(self.ipv4_target(ip, addr.port())),
        }
    }

    fn is_encrypted_dns(&self, ip: Ipv6Addr) -> bool {
        self.config.dns_bypass.iter().any(|net| net.contains(&ip))
    }

    fn ipv4_target(&self, ip: Ipv4Addr, port: u16) -> RedirectTarget {
        if FakeIpTable::is_fake(ip) {
            match self.fake_ips.resolve(ip) {
                Some(host) => {
                    tracing::trace!(%ip, host, "fake address resolved");
                    return RedirectTarget::name(host, port);
                }
                None => tracing::warn!(%ip, "fake range address was never allocated"),
            }
        }

        RedirectTarget::ip(IpAddr::V4(ip), port)
    }
}

#[cfg(test)]
mod tests {
    use proxify_config::ProxyConfig;
    use rstest::{fixture, rstest};

    use super::*;

    fn config(ipv6_mode: Ipv6Mode) -> LayerConfig {
        LayerConfig {
            proxy: ProxyConfig::new("127.0.0.1", 8080).with_ipv6_mode(ipv6_mode),
            ..Default::default()
        }
    }

    #[fixture]
    fn fake_ips() -> FakeIpTable {
        FakeIpTable::new()
    }

    fn disabled() -> LayerConfig {
        LayerConfig::default()
    }

    #[rstest]
    #[case("127.0.0.1:80")]
    #[case("127.255.0.7:443")]
    #[case("[::1]:443")]
    #[case("[::ffff:127.0.0.1]:8080")]
    #[case("8.8.8.8:53")]
    #[case("[2001:db8::1]:53")]
    fn always_bypassed(#[case] addr: &str, fake_ips: FakeIpTable) {
        let addr: SocketAddr = addr.parse().unwrap();

        for config in [
            config(Ipv6Mode::Proxy),
            config(Ipv6Mode::Block),
            config(Ipv6Mode::Direct),
            disabled(),
        ] {
            let decision = ConnectSelector::new(&config, &fake_ips).classify(addr);
            assert!(
                matches!(
                    decision,
                    ConnectDecision::Bypass(Bypass::Loopback(_) | Bypass::DnsPort(_))
                ),
                "{addr} -> {decision:?}"
            );
        }
    }

    #[rstest]
    #[case(Ipv6Mode::Block, ConnectDecision::Block(BlockReason::Ipv6))]
    #[case(
        Ipv6Mode::Direct,
        ConnectDecision::Bypass(Bypass::Ipv6Direct("[2001:db8::1]:443".parse().unwrap()))
    )]
    #[case(
        Ipv6Mode::Proxy,
        ConnectDecision::Redirect(RedirectTarget::ip("2001:db8::1".parse().unwrap(), 443))
    )]
    fn ipv6_partition(
        #[case] mode: Ipv6Mode,
        #[case] expected: ConnectDecision,
        fake_ips: FakeIpTable,
    ) {
        let config = config(mode);
        let decision =
            ConnectSelector::new(&config, &fake_ips).classify("[2001:db8::1]:443".parse().unwrap());

        assert_eq!(decision, expected);
    }

    #[rstest]
    fn encrypted_dns_provider_bypassed(fake_ips: FakeIpTable) {
        let config = config(Ipv6Mode::Block);
        let selector = ConnectSelector::new(&config, &fake_ips);

        assert_eq!(
            selector.classify("[2001:4860:4860::8888]:443".parse().unwrap()),
            ConnectDecision::Bypass(Bypass::EncryptedDns(
                "[2001:4860:4860::8888]:443".parse().unwrap()
            ))
        );
        assert_eq!(
            selector.classify("[2001:4860:4860::8888]:80".parse().unwrap()),
            ConnectDecision::Block(BlockReason::Ipv6)
        );
    }

    #[rstest]
    fn disabled_bypasses_everything_else(fake_ips: FakeIpTable) {
        let config = disabled();
        let selector = ConnectSelector::new(&config, &fake_ips);

        assert_eq!(
            selector.classify("93.184.216.34:443".parse().unwrap()),
            ConnectDecision::Bypass(Bypass::ProxyDisabled)
        );
        assert_eq!(
            selector.classify("[2001:db8::1]:443".parse().unwrap()),
            ConnectDecision::Bypass(Bypass::ProxyDisabled)
        );
    }

    #[rstest]
    fn fake_address_round_trip(fake_ips: FakeIpTable) {
        let config = config(Ipv6Mode::Proxy);
        let fake = fake_ips.allocate("example.com").unwrap();

        let decision = ConnectSelector::new(&config, &fake_ips)
            .classify(SocketAddr::new(IpAddr::V4(fake), 443));

        assert_eq!(
            decision,
            ConnectDecision::Redirect(RedirectTarget::name("example.com", 443))
        );
    }

    #[rstest]
    fn mapped_fake_address_round_trip(fake_ips: FakeIpTable) {
        let config = config(Ipv6Mode::Block);
        let fake = fake_ips.allocate("example.com").unwrap();
        let mapped = SocketAddr::new(IpAddr::V6(fake.to_ipv6_mapped()), 443);

        let decision = ConnectSelector::new(&config, &fake_ips).classify(mapped);

        assert_eq!(
            decision,
            ConnectDecision::Redirect(RedirectTarget::name("example.com", 443))
        );
    }

    #[rstest]
    #[case(Ipv6Mode::Block)]
    #[case(Ipv6Mode::Direct)]
    #[case(Ipv6Mode::Proxy)]
    fn mapped_ipv4_ignores_ipv6_mode(#[case] mode: Ipv6Mode, fake_ips: FakeIpTable) {
        let config = config(mode);

        let decision = ConnectSelector::new(&config, &fake_ips)
            .classify("[::ffff:93.184.216.34]:443".parse().unwrap());

        assert_eq!(
            decision,
            ConnectDecision::Redirect(RedirectTarget::ip("93.184.216.34".parse().unwrap(), 443))
        );
    }

    #[rstest]
    fn unallocated_fake_address_stays_literal(fake_ips: FakeIpTable) {
        let config = config(Ipv6Mode::Proxy);

        let decision =
            ConnectSelector::new(&config, &fake_ips).classify("198.18.3.4:80".parse().unwrap());

        assert_eq!(
            decision,
            ConnectDecision::Redirect(RedirectTarget::ip("198.18.3.4".parse().unwrap(), 80))
        );
    }

    #[rstest]
    #[case(RedirectTarget::name("example.com", 443), "example.com:443")]
    #[case(RedirectTarget::ip("93.184.216.34".parse().unwrap(), 80), "93.184.216.34:80")]
    #[case(RedirectTarget::ip("2001:db8::1".parse().unwrap(), 443), "[2001:db8::1]:443")]
    fn authority(#[case] target: RedirectTarget, #[case] expected: &str) {
        assert_eq!(target.authority(), expected);
    }
}
