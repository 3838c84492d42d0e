use std::path::PathBuf;

use miette::Diagnostic;
use proxify_config::config::ConfigError;
use proxify_layer_lib::error::LayerError;
use thiserror::Error;

pub(crate) type CliResult<T, E = CliError> = core::result::Result<T, E>;

const GENERAL_HELP: &str = r#"

- Run with `RUST_LOG=proxify=debug` for more details.
- The layer writes its own logs to the file in `PROXIFY_LAYER_LOG_PATH`, when set.
"#;

#[derive(Debug, Error, Diagnostic)]
pub(crate) enum CliError {
    #[error("Invalid proxy: {0}")]
    #[diagnostic(help(
        "Expected `[label=][scheme://]host:port`, e.g. `127.0.0.1:7890` or `socks=proxy:1080`."
    ))]
    InvalidProxy(#[source] ConfigError),

    #[error("Layer DLL not found at `{}`", .0.display())]
    #[diagnostic(help(
        "Pass the DLL with `--layer-file`, set `PROXIFY_LAYER_FILE` or place `proxify_layer_win.dll` next to the proxify executable."
    ))]
    LayerNotFound(PathBuf),

    #[error("Could not locate the proxify executable: {0}")]
    #[diagnostic(help("Pass the layer DLL explicitly with `--layer-file`.{GENERAL_HELP}"))]
    CurrentExe(#[source] std::io::Error),

    #[error("Failed to launch the binary with the layer: {0}")]
    #[diagnostic(help("Check that the binary exists and has the same architecture as the layer DLL.{GENERAL_HELP}"))]
    Launch(#[from] LayerError),

    #[error("Could not serialize the configuration: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("`proxify exec` is only supported on Windows")]
    UnsupportedPlatform,
}
