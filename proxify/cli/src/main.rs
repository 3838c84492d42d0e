#![warn(clippy::indexing_slicing)]

use clap::Parser;
use config::{Cli, Commands, ParseProxyArgs};
use error::{CliError, CliResult};
use proxify_config::ProxyConfig;

mod config;
mod error;
mod execution;
mod logging;

fn parse_proxy(args: &ParseProxyArgs) -> CliResult<String> {
    let proxy = args
        .proxy
        .parse::<ProxyConfig>()
        .map_err(CliError::InvalidProxy)?;

    if args.json {
        Ok(serde_json::to_string_pretty(&proxy)?)
    } else {
        Ok(proxy.to_string())
    }
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    logging::init_tracing_registry();

    match cli.commands {
        Commands::Exec(args) => {
            let exit_code = execution::exec(&args)?;
            tracing::debug!(exit_code, "binary exited");

            if exit_code != 0 {
                // Windows exit codes are unsigned, NTSTATUS values come out negative.
                std::process::exit(exit_code as i32);
            }
        }
        Commands::ParseProxy(args) => println!("{}", parse_proxy(&args)?),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("127.0.0.1:7890", "127.0.0.1:7890 (prefer http")]
    #[case("socks=proxy.corp:1080", "proxy.corp:1080 (prefer socks5")]
    fn parse_proxy_prints_summary(#[case] proxy: &str, #[case] expected_prefix: &str) {
        let printed = parse_proxy(&ParseProxyArgs {
            proxy: proxy.to_string(),
            json: false,
        })
        .unwrap();

        assert!(printed.starts_with(expected_prefix), "{printed}");
    }

    #[rstest]
    fn parse_proxy_json() {
        let printed = parse_proxy(&ParseProxyArgs {
            proxy: "http=127.0.0.1:7890;https=127.0.0.1:7890".to_string(),
            json: true,
        })
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&printed).unwrap();
        assert_eq!(value["host"], "127.0.0.1");
        assert_eq!(value["port"], 7890);
    }

    #[rstest]
    fn parse_proxy_rejects_garbage() {
        let result = parse_proxy(&ParseProxyArgs {
            proxy: "not a proxy".to_string(),
            json: false,
        });

        assert!(matches!(result, Err(CliError::InvalidProxy(_))));
    }
}
