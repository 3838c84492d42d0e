//! `proxify exec`: launching a binary with the layer injected.

use std::path::{Path, PathBuf};

use proxify_config::ProxyConfig;
use proxify_layer_lib::process::PROXIFY_LAYER_FILE_ENV;

use crate::{
    config::ExecArgs,
    error::{CliError, CliResult},
};

/// File name of the layer, as built by `proxify-layer-win`.
pub(crate) const LAYER_FILE_NAME: &str = "proxify_layer_win.dll";

/// Picks the layer DLL: `explicit`, then `from_env`, then [`LAYER_FILE_NAME`] in `exe_dir`.
///
/// Only the chosen candidate is checked for existence.
fn pick_layer_path(
    explicit: Option<PathBuf>,
    from_env: Option<PathBuf>,
    exe_dir: impl FnOnce() -> CliResult<PathBuf>,
) -> CliResult<PathBuf> {
    let path = match explicit.or(from_env) {
        Some(path) => path,
        None => exe_dir()?.join(LAYER_FILE_NAME),
    };

    if path.is_file() {
        Ok(path)
    } else {
        Err(CliError::LayerNotFound(path))
    }
}

fn layer_path(explicit: Option<PathBuf>) -> CliResult<PathBuf> {
    let from_env = std::env::var_os(PROXIFY_LAYER_FILE_ENV).map(PathBuf::from);

    pick_layer_path(explicit, from_env, || {
        let exe = std::env::current_exe().map_err(CliError::CurrentExe)?;

        Ok(exe.parent().map(Path::to_path_buf).unwrap_or_default())
    })
}

/// Runs `args.binary` with the layer and returns its exit code.
pub(crate) fn exec(args: &ExecArgs) -> CliResult<u32> {
    if cfg!(not(target_os = "windows")) {
        return Err(CliError::UnsupportedPlatform);
    }

    // Fail here rather than in the layer, which would fall back to the system proxy.
    if let Some(proxy) = &args.proxy {
        proxy
            .parse::<ProxyConfig>()
            .map_err(CliError::InvalidProxy)?;
    }

    let layer = layer_path(args.layer_file.clone())?;

    for (key, value) in args.env_overrides() {
        tracing::debug!(key, %value, "exporting override");
        // Nothing else runs yet; the child inherits the environment.
        unsafe { std::env::set_var(key, value) };
    }

    tracing::info!(
        binary = %args.binary,
        args = ?args.binary_args,
        layer = %layer.display(),
        "launching"
    );

    launch(&args.binary, &args.binary_args, &layer)
}

#[cfg(target_os = "windows")]
fn launch(binary: &str, binary_args: &[String], layer: &Path) -> CliResult<u32> {
    use proxify_layer_lib::process::windows::LayeredProcess;

    let process = LayeredProcess::spawn(binary, binary_args, layer)?;
    Ok(process.wait_until_exit()?)
}

#[cfg(not(target_os = "windows"))]
fn launch(_binary: &str, _binary_args: &[String], _layer: &Path) -> CliResult<u32> {
    Err(CliError::UnsupportedPlatform)
}
