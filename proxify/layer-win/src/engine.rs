//! [`HookEngine`] on top of MinHook.

use std::ffi::c_void;

use minhook::MinHook;
use proxify_layer_lib::hooks::{HookEngine, HookRegistry};

#[derive(Debug, Default)]
pub struct MinHookEngine;

impl HookEngine for MinHookEngine {
    type Error = String;

    unsafe fn install(
        &mut self,
        target: *mut c_void,
        detour: *mut c_void,
    ) -> Result<*mut c_void, Self::Error> {
        unsafe { MinHook::create_hook(target as _, detour as _) }
            .map(|trampoline| trampoline as *mut c_void)
            .map_err(|status| format!("{status:?}"))
    }

    fn enable_all(&mut self) -> Result<(), Self::Error> {
        unsafe { MinHook::enable_all_hooks() }.map_err(|status| format!("{status:?}"))
    }

    /// Disabling restores the original prologues; the trampolines stay allocated until the
    /// process exits, since a thread may still be running inside one.
    fn remove_all(&mut self) -> Result<(), Self::Error> {
        unsafe { MinHook::disable_all_hooks() }.map_err(|status| format!("{status:?}"))
    }
}

pub type Registry = HookRegistry<MinHookEngine>;
