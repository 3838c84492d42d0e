//! Hook on process creation, carrying the layer into child processes.

use std::sync::OnceLock;

use proxify_layer_lib::{
    error::LayerResult,
    process::{
        ChildLaunch,
        windows::{inject_and_resume, resume_thread},
    },
    setup::layer_setup,
};
use winapi::{
    shared::{
        minwindef::{BOOL, DWORD, FALSE, LPVOID, TRUE},
        ntdef::{LPCWSTR, LPWSTR},
        winerror::ERROR_INVALID_FUNCTION,
    },
    um::{
        errhandlingapi::SetLastError,
        minwinbase::LPSECURITY_ATTRIBUTES,
        processthreadsapi::{LPPROCESS_INFORMATION, LPSTARTUPINFOW},
    },
};

use crate::{apply_hook, engine::Registry, process::current_module_path};

type CreateProcessWType = unsafe extern "system" fn(
    lpApplicationName: LPCWSTR,
    lpCommandLine: LPWSTR,
    lpProcessAttributes: LPSECURITY_ATTRIBUTES,
    lpThreadAttributes: LPSECURITY_ATTRIBUTES,
    bInheritHandles: BOOL,
    dwCreationFlags: DWORD,
    lpEnvironment: LPVOID,
    lpCurrentDirectory: LPCWSTR,
    lpStartupInfo: LPSTARTUPINFOW,
    lpProcessInformation: LPPROCESS_INFORMATION,
) -> BOOL;
static CREATE_PROCESS_W_ORIGINAL: OnceLock<CreateProcessWType> = OnceLock::new();

unsafe extern "system" fn create_process_w_detour(
    lpApplicationName: LPCWSTR,
    lpCommandLine: LPWSTR,
    lpProcessAttributes: LPSECURITY_ATTRIBUTES,
    lpThreadAttributes: LPSECURITY_ATTRIBUTES,
    bInheritHandles: BOOL,
    dwCreationFlags: DWORD,
    lpEnvironment: LPVOID,
    lpCurrentDirectory: LPCWSTR,
    lpStartupInfo: LPSTARTUPINFOW,
    lpProcessInformation: LPPROCESS_INFORMATION,
) -> BOOL {
    let Some(&original) = CREATE_PROCESS_W_ORIGINAL.get() else {
        unsafe { SetLastError(ERROR_INVALID_FUNCTION) };
        return FALSE;
    };

    let create = |creation_flags| unsafe {
        original(
            lpApplicationName,
            lpCommandLine,
            lpProcessAttributes,
            lpThreadAttributes,
            bInheritHandles,
            creation_flags,
            lpEnvironment,
            lpCurrentDirectory,
            lpStartupInfo,
            lpProcessInformation,
        )
    };

    let propagate = layer_setup().is_some_and(|setup| setup.config().proxy.is_enabled());
    if !propagate || lpProcessInformation.is_null() {
        return create(dwCreationFlags);
    }

    let launch = ChildLaunch::plan(dwCreationFlags);
    if create(launch.creation_flags) == FALSE {
        return FALSE;
    }

    let process_info = unsafe { &*lpProcessInformation };
    let pid = process_info.dwProcessId;

    match current_module_path() {
        Some(layer_path) => {
            if let Err(error) = unsafe { inject_and_resume(process_info, launch, &layer_path) } {
                tracing::warn!(pid, %error, "child runs without the layer");
            }
        }
        None => {
            tracing::warn!(pid, "layer path unknown, child runs without the layer");

            if launch.resume
                && let Err(error) = unsafe { resume_thread(process_info.hThread) }
            {
                tracing::error!(pid, %error, "failed to resume child");
            }
        }
    }

    TRUE
}

pub fn initialize_hooks(registry: &mut Registry) -> LayerResult<()> {
    apply_hook!(
        registry,
        "kernel32",
        "CreateProcessW",
        create_process_w_detour,
        CreateProcessWType,
        CREATE_PROCESS_W_ORIGINAL
    )?;

    Ok(())
}
