//! Name resolution rewriting.
//!
//! The resolver intercepts swap the requested name for a fake address literal, so the
//! application gets a usable address back while the real name is kept for the proxy.

use std::net::{IpAddr, Ipv4Addr};

use proxify_config::LayerConfig;

use crate::{detour::Bypass, fakeip::FakeIpTable};

/// Whether `node` must be resolved by the real resolver.
fn is_local_name(node: &str) -> Option<Bypass> {
    if node.is_empty() {
        Some(Bypass::NullNode)
    } else if node.eq_ignore_ascii_case("localhost")
        || node.starts_with("127.")
        || node.parse::<IpAddr>().is_ok()
        // `[::1]` style literals.
        || node
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .is_some_and(|inner| inner.parse::<IpAddr>().is_ok())
    {
        Some(Bypass::LocalHostname)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NameRewriter<'a> {
    config: &'a LayerConfig,
    fake_ips: &'a FakeIpTable,
}

impl<'a> NameRewriter<'a> {
    pub fn new(config: &'a LayerConfig, fake_ips: &'a FakeIpTable) -> Self {
        Self { config, fake_ips }
    }

    /// The fake address to resolve instead of `node`, or why `node` goes to the resolver as-is.
    pub fn rewrite(&self, node: &str) -> Result<Ipv4Addr, Bypass> {
        if !self.config.proxy.is_enabled() {
            return Err(Bypass::ProxyDisabled);
        }

        if let Some(bypass) = is_local_name(node) {
            return Err(bypass);
        }

        match self.fake_ips.allocate(node) {
            Ok(fake) => {
                tracing::trace!(node, %fake, "name rewritten");
                Ok(fake)
            }
            Err(error) => {
                tracing::warn!(node, %error, "resolving with the real resolver");
                Err(Bypass::FakeIpExhausted)
            }
        }
    }

    /// [`Self::rewrite`] for callers that only need the replacement.
    pub fn fake_node(&self, node: &str) -> Option<Ipv4Addr> {
        self.rewrite(node).ok()
    }
}

#[cfg(test)]
mod tests {
    use proxify_config::ProxyConfig;
    use rstest::rstest;

    use super::*;

    fn enabled() -> LayerConfig {
        LayerConfig {
            proxy: ProxyConfig::new("127.0.0.1", 8080),
            ..Default::default()
        }
    }

    #[rstest]
    #[case("", Bypass::NullNode)]
    #[case("localhost", Bypass::LocalHostname)]
    #[case("LocalHost", Bypass::LocalHostname)]
    #[case("127.0.0.1", Bypass::LocalHostname)]
    #[case("127.internal", Bypass::LocalHostname)]
    #[case("93.184.216.34", Bypass::LocalHostname)]
    #[case("2001:db8::1", Bypass::LocalHostname)]
    #[case("[2001:db8::1]", Bypass::LocalHostname)]
    fn local_names_untouched(#[case] node: &str, #[case] expected: Bypass) {
        let config = enabled();
        let fake_ips = FakeIpTable::new();

        assert_eq!(NameRewriter::new(&config, &fake_ips).rewrite(node), Err(expected));
        assert!(fake_ips.is_empty());
    }

    #[rstest]
    fn hostname_gets_stable_fake_address() {
        let config = enabled();
        let fake_ips = FakeIpTable::new();
        let rewriter = NameRewriter::new(&config, &fake_ips);

        let first = rewriter.fake_node("example.com").unwrap();
        let again = rewriter.fake_node("example.com").unwrap();
        let other = rewriter.fake_node("example.org").unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert!(FakeIpTable::is_fake(first));
        assert_eq!(fake_ips.resolve(first).as_deref(), Some("example.com"));
    }

    #[rstest]
    fn exhausted_table_falls_back() {
        let config = enabled();
        let fake_ips = FakeIpTable::with_last(u32::from(Ipv4Addr::new(198, 18, 0, 1)));
        let rewriter = NameRewriter::new(&config, &fake_ips);

        let first = rewriter.fake_node("first.example").unwrap();

        assert_eq!(rewriter.rewrite("second.example"), Err(Bypass::FakeIpExhausted));
        assert_eq!(rewriter.fake_node("first.example"), Some(first));
    }

    #[rstest]
    fn disabled_proxy_resolves_normally() {
        let config = LayerConfig::default();
        let fake_ips = FakeIpTable::new();

        assert_eq!(
            NameRewriter::new(&config, &fake_ips).rewrite("example.com"),
            Err(Bypass::ProxyDisabled)
        );
        assert!(fake_ips.is_empty());
    }
}
