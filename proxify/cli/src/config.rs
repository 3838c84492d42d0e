#![deny(missing_docs)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint};
use proxify_config::{
    Ipv6Mode, PROXIFY_IPV6_MODE_ENV, PROXIFY_PROXY_ENV, PROXIFY_PROXY_PROTOCOL_ENV,
    PROXIFY_TIMEOUT_MS_ENV, ProtocolHint,
};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub(super) struct Cli {
    #[command(subcommand)]
    pub(super) commands: Commands,
}

#[derive(Debug, Subcommand)]
pub(super) enum Commands {
    /// Execute a binary with its outbound TCP routed through the proxy.
    ///
    /// Child processes started by the binary get the layer as well.
    Exec(Box<ExecArgs>),

    /// Parse a proxy string, in the format used by the system proxy setting, and print the
    /// resulting configuration.
    ParseProxy(ParseProxyArgs),
}

/// `proxify exec` command.
#[derive(Args, Debug, Default)]
pub(super) struct ExecArgs {
    /// Proxy to use instead of the system proxy, e.g. `127.0.0.1:7890` or `socks=proxy:1080`.
    #[arg(long)]
    pub proxy: Option<String>,

    /// Protocol the proxy is declared as, `http` or `socks5`. Recorded in the logs only, the
    /// handshake always tries HTTP CONNECT first.
    #[arg(long)]
    pub protocol: Option<ProtocolHint>,

    /// What to do with IPv6 destinations: `proxy`, `direct` or `block`.
    #[arg(long)]
    pub ipv6: Option<Ipv6Mode>,

    /// Timeout for each read of the proxy handshake, in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Path of the layer DLL. Defaults to `$PROXIFY_LAYER_FILE`, then to the DLL next to this
    /// executable.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub layer_file: Option<PathBuf>,

    /// Binary to execute.
    #[arg(value_hint = ValueHint::CommandName)]
    pub binary: String,

    /// Arguments to pass to the binary.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub binary_args: Vec<String>,
}

impl ExecArgs {
    /// Environment variables carrying the overrides to the layer.
    pub fn env_overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = Vec::new();

        if let Some(proxy) = &self.proxy {
            overrides.push((PROXIFY_PROXY_ENV, proxy.clone()));
        }
        if let Some(protocol) = self.protocol {
            overrides.push((PROXIFY_PROXY_PROTOCOL_ENV, protocol.to_string()));
        }
        if let Some(ipv6) = self.ipv6 {
            overrides.push((PROXIFY_IPV6_MODE_ENV, ipv6.to_string()));
        }
        if let Some(timeout_ms) = self.timeout_ms {
            overrides.push((PROXIFY_TIMEOUT_MS_ENV, timeout_ms.to_string()));
        }

        overrides
    }
}

/// `proxify parse-proxy` command.
#[derive(Args, Debug)]
pub(super) struct ParseProxyArgs {
    /// The proxy string, e.g. `http=127.0.0.1:7890;https=127.0.0.1:7890`.
    pub proxy: String,

    /// Print the configuration as JSON.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn exec_arguments_after_binary_are_passed_through() {
        let cli = Cli::try_parse_from([
            "proxify",
            "exec",
            "--proxy",
            "127.0.0.1:7890",
            "--protocol",
            "socks5",
            "--",
            "curl.exe",
            "-v",
            "--proxy",
            "none",
        ])
        .unwrap();

        let Commands::Exec(args) = cli.commands else {
            panic!("expected exec, got {:?}", cli.commands);
        };

        assert_eq!(args.proxy.as_deref(), Some("127.0.0.1:7890"));
        assert_eq!(args.protocol, Some(ProtocolHint::Socks5));
        assert_eq!(args.binary, "curl.exe");
        assert_eq!(args.binary_args, ["-v", "--proxy", "none"]);
    }

    #[rstest]
    fn rejects_unknown_ipv6_mode() {
        let parsed = Cli::try_parse_from(["proxify", "exec", "--ipv6", "tunnel", "app.exe"]);

        assert!(parsed.is_err());
    }

    #[rstest]
    fn only_given_overrides_are_exported() {
        let args = ExecArgs {
            ipv6: Some(Ipv6Mode::Block),
            timeout_ms: Some(2500),
            binary: "app.exe".to_string(),
            ..Default::default()
        };

        assert_eq!(
            args.env_overrides(),
            [
                (PROXIFY_IPV6_MODE_ENV, "block".to_string()),
                (PROXIFY_TIMEOUT_MS_ENV, "2500".to_string()),
            ]
        );
    }
}
