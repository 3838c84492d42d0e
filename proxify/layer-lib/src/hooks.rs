//! Bookkeeping around the inline hooking engine.

use std::{ffi::c_void, fmt::Display};

use crate::error::{LayerError, LayerResult};

/// The inline hooking backend (MinHook on Windows).
pub trait HookEngine {
    type Error: Display;

    /// Patches `target` so that it jumps to `detour`, returns the trampoline that calls the
    /// original function.
    ///
    /// # Safety
    ///
    /// `target` and `detour` must be functions with the same signature and calling convention.
    unsafe fn install(
        &mut self,
        target: *mut c_void,
        detour: *mut c_void,
    ) -> Result<*mut c_void, Self::Error>;

    fn enable_all(&mut self) -> Result<(), Self::Error>;

    fn remove_all(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledHook {
    pub module: &'static str,
    pub function: &'static str,
}

/// Installs hooks through a [`HookEngine`], remembering what was installed so that teardown is
/// symmetric.
#[derive(Debug)]
pub struct HookRegistry<E> {
    engine: E,
    installed: Vec<InstalledHook>,
    enabled: bool,
}

impl<E: HookEngine> HookRegistry<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            installed: Vec::new(),
            enabled: false,
        }
    }

    /// Hooks `module!function`, found at `target`.
    ///
    /// An export that doesn't exist on this system (`target` is `None` or null) is skipped with
    /// a warning, `Ok(None)` is returned.
    ///
    /// # Safety
    ///
    /// See [`HookEngine::install`].
    pub unsafe fn install(
        &mut self,
        module: &'static str,
        function: &'static str,
        target: Option<*mut c_void>,
        detour: *mut c_void,
    ) -> LayerResult<Option<*mut c_void>> {
        let Some(target) = target.filter(|target| !target.is_null()) else {
            tracing::warn!(module, function, "export not found, not hooked");
            return Ok(None);
        };

        if self.is_installed(function) {
            return Err(LayerError::HookAlreadyApplied(function));
        }

        let original = unsafe { self.engine.install(target, detour) }.map_err(|error| {
            LayerError::HookEngineApply {
                function,
                dll: module,
                error: error.to_string(),
            }
        })?;

        tracing::trace!(module, function, "hook installed");
        self.installed.push(InstalledHook { module, function });

        Ok(Some(original))
    }

    pub fn enable(&mut self) -> LayerResult<()> {
        self.engine
            .enable_all()
            .map_err(|error| LayerError::HookEngineEnable(error.to_string()))?;
        self.enabled = true;

        tracing::info!(hooks = self.installed.len(), "hooks enabled");
        Ok(())
    }

    /// Removes every installed hook. Calling it again is a no-op.
    pub fn remove_all(&mut self) -> LayerResult<()> {
        if self.installed.is_empty() {
            return Ok(());
        }

        self.engine
            .remove_all()
            .map_err(|error| LayerError::HookEngineRemove(error.to_string()))?;

        tracing::info!(hooks = self.installed.len(), "hooks removed");
        self.installed.clear();
        self.enabled = false;

        Ok(())
    }

    pub fn is_installed(&self, function: &str) -> bool {
        self.installed.iter().any(|hook| hook.function == function)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn installed(&self) -> &[InstalledHook] {
        &self.installed
    }
}
