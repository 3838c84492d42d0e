//! Module responsible for providing [`initialize_hooks`] and [`remove_hooks`].

pub(crate) mod dns;
pub(crate) mod process;
pub(crate) mod socket;

use std::sync::{Mutex, PoisonError};

use proxify_layer_lib::{
    error::{LayerError, LayerResult},
    hooks::HookRegistry,
};

use crate::engine::{MinHookEngine, Registry};

static REGISTRY: Mutex<Option<Registry>> = Mutex::new(None);

pub fn initialize_hooks() -> LayerResult<()> {
    let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    if registry.is_some() {
        return Err(LayerError::GlobalAlreadyInitialized("hook registry"));
    }

    let mut hooks = HookRegistry::new(MinHookEngine);

    socket::initialize_hooks(&mut hooks)?;
    dns::initialize_hooks(&mut hooks)?;
    process::initialize_hooks(&mut hooks)?;

    hooks.enable()?;

    *registry = Some(hooks);
    Ok(())
}

/// Restores every hooked function. Safe to call more than once.
pub fn remove_hooks() -> LayerResult<()> {
    let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);

    match registry.as_mut() {
        Some(hooks) => hooks.remove_all(),
        None => Ok(()),
    }
}
