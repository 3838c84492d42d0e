//! Macros for declaring the DLL entry point and installing hooks.

/// Declares `DllMain`, forwarding to `$handler(module, reason_for_call, reserved)`.
#[macro_export]
macro_rules! entry_point {
    ($handler:expr) => {
        #[unsafe(no_mangle)]
        #[allow(non_snake_case)]
        pub unsafe extern "system" fn DllMain(
            module: winapi::shared::minwindef::HINSTANCE,
            reason_for_call: winapi::shared::minwindef::DWORD,
            reserved: winapi::shared::minwindef::LPVOID,
        ) -> winapi::shared::minwindef::BOOL {
            let handler: fn(
                winapi::shared::minwindef::HINSTANCE,
                winapi::shared::minwindef::DWORD,
                winapi::shared::minwindef::LPVOID,
            ) -> winapi::shared::minwindef::BOOL = $handler;

            handler(module, reason_for_call, reserved)
        }
    };
}

/// Hooks `dll!fn` with `detour` and stores the trampoline in `original`.
///
/// # Arguments
///
/// * `registry` - The [`proxify_layer_lib::hooks::HookRegistry`] that installs the hook.
/// * `dll` - Name of the module exporting the function.
/// * `fn` - Name of the exported function.
/// * `detour` - Rust replacement, with the exact signature of the original.
/// * `detour_type` - `unsafe extern "system" fn(..)` type of the function.
/// * `original` - `OnceLock<detour_type>` receiving the trampoline.
///
/// Evaluates to `LayerResult<()>`. An export missing from the system is skipped.
#[macro_export]
macro_rules! apply_hook {
    ($registry:expr, $dll:literal, $fn:literal, $detour:ident, $detour_type:ty, $original:ident) => {{
        let detour: $detour_type = $detour;
        let target = $crate::process::get_export($dll, $fn);

        match unsafe { $registry.install($dll, $fn, target, detour as *mut std::ffi::c_void) } {
            Ok(Some(trampoline)) => $original
                .set(unsafe {
                    std::mem::transmute::<*mut std::ffi::c_void, $detour_type>(trampoline)
                })
                .map_err(|_| proxify_layer_lib::error::LayerError::HookAlreadyApplied($fn)),
            Ok(None) => Ok(()),
            Err(error) => Err(error),
        }
    }};
}
