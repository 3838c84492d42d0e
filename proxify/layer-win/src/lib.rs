//! The proxify layer DLL.
//!
//! Once loaded into a process (by `proxify exec` or by a parent that already has it), the layer
//! reads the proxy configuration and hooks Winsock so that outbound TCP goes through the proxy.
#![cfg(target_os = "windows")]
#![allow(non_snake_case)]
#![allow(clippy::too_many_arguments)]

mod discovery;
mod engine;
mod hooks;
mod macros;
pub mod process;

use std::thread;

use proxify_config::LayerConfig;
use proxify_layer_lib::{
    logging::init_tracing,
    setup::{init_setup, teardown_setup},
};
use winapi::{
    shared::minwindef::{BOOL, FALSE, HINSTANCE, LPVOID, TRUE},
    um::winnt::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH, DLL_THREAD_ATTACH, DLL_THREAD_DETACH},
};

use crate::hooks::{initialize_hooks, remove_hooks, socket::state::NON_BLOCKING};

fn proxify_start() -> anyhow::Result<()> {
    init_tracing();

    let system_proxy = discovery::system_proxy_string();
    let config = LayerConfig::resolve(system_proxy.as_deref())?;

    let setup = init_setup(config)?;
    tracing::info!(
        proxy_enabled = setup.config().proxy.is_enabled(),
        pid = std::process::id(),
        "layer configured"
    );

    initialize_hooks()?;
    Ok(())
}

/// Function that gets called upon DLL initialization ([`DLL_PROCESS_ATTACH`]).
///
/// Initialization runs on its own thread, the loader lock is held for the duration of `DllMain`.
fn dll_attach(_module: HINSTANCE, _reserved: LPVOID) -> BOOL {
    let _ = thread::spawn(|| {
        if let Err(error) = proxify_start() {
            tracing::error!(%error, "layer initialization failed, the process runs unproxied");
        }
    });

    TRUE
}

/// Function that gets called upon DLL deinitialization ([`DLL_PROCESS_DETACH`]).
fn dll_detach(_module: HINSTANCE, _reserved: LPVOID) -> BOOL {
    if let Err(error) = remove_hooks() {
        tracing::warn!(%error, "failed removing hooks during detach");
    }

    teardown_setup();
    NON_BLOCKING.clear();

    TRUE
}

entry_point!(|module, reason_for_call, reserved| {
    match reason_for_call {
        DLL_PROCESS_ATTACH => dll_attach(module, reserved),
        DLL_PROCESS_DETACH => dll_detach(module, reserved),
        DLL_THREAD_ATTACH | DLL_THREAD_DETACH => TRUE,
        _ => FALSE,
    }
});
