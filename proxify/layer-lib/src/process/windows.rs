//! Windows process creation with layer injection.

use std::{ffi::OsString, ops::Deref, path::Path, ptr};

use dll_syringe::{Syringe, process::OwnedProcess as InjectorOwnedProcess};
use winapi::{
    shared::minwindef::DWORD,
    um::{
        handleapi::CloseHandle,
        processthreadsapi::{
            CreateProcessW, GetExitCodeProcess, PROCESS_INFORMATION, ResumeThread, STARTUPINFOW,
            TerminateProcess,
        },
        synchapi::WaitForSingleObject,
        winbase::{INFINITE, WAIT_OBJECT_0},
    },
};

use super::{ChildLaunch, build_command_line};
use crate::{
    error::{LayerError, LayerResult, windows::WindowsError},
    str_win::string_to_u16_buffer,
};

/// Injects `dll_path` into the (suspended) process `pid`.
pub fn inject_layer(pid: u32, dll_path: &Path) -> LayerResult<()> {
    let process =
        InjectorOwnedProcess::from_pid(pid).map_err(|_| LayerError::ProcessNotFound(pid))?;

    Syringe::for_process(process)
        .inject(OsString::from(dll_path.as_os_str()))
        .map_err(|error| LayerError::DllInjection(error.to_string()))?;

    tracing::debug!(pid, dll = %dll_path.display(), "layer injected");
    Ok(())
}

/// Resumes the main thread of a process created with `CREATE_SUSPENDED`.
///
/// # Safety
///
/// `thread` must be a valid thread handle.
pub unsafe fn resume_thread(thread: winapi::shared::ntdef::HANDLE) -> LayerResult<()> {
    if unsafe { ResumeThread(thread) } == u32::MAX {
        return Err(LayerError::WindowsProcessCreation(WindowsError::last_error()));
    }

    Ok(())
}

/// Runs the second half of a [`ChildLaunch`]: inject, then resume if the caller didn't want the
/// child suspended.
///
/// # Safety
///
/// `process_info` must come from a successful process creation with
/// [`ChildLaunch::creation_flags`].
pub unsafe fn inject_and_resume(
    process_info: &PROCESS_INFORMATION,
    launch: ChildLaunch,
    dll_path: &Path,
) -> LayerResult<()> {
    let injected = inject_layer(process_info.dwProcessId, dll_path);

    if launch.resume {
        unsafe { resume_thread(process_info.hThread) }?;
    }

    injected
}

/// A child process launched with the layer, owned by the launcher.
///
/// Handles are closed on drop; the process is terminated on drop unless it was waited on.
pub struct LayeredProcess {
    process_info: PROCESS_INFORMATION,
    terminate_on_drop: bool,
}

impl LayeredProcess {
    /// Creates `program args...` suspended, injects `dll_path` and resumes it.
    pub fn spawn<I, S>(program: &str, args: I, dll_path: &Path) -> LayerResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !dll_path.exists() {
            return Err(LayerError::DllInjection(format!(
                "layer DLL not found at `{}`",
                dll_path.display()
            )));
        }

        let launch = ChildLaunch::plan(0);
        let mut command_line = string_to_u16_buffer(&build_command_line(program, args));
        let mut startup_info = STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOW>() as DWORD,
            ..unsafe { std::mem::zeroed() }
        };
        let mut process_info: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };

        let created = unsafe {
            CreateProcessW(
                ptr::null(),
                command_line.as_mut_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
                true.into(),
                launch.creation_flags,
                ptr::null_mut(),
                ptr::null(),
                &mut startup_info,
                &mut process_info,
            )
        };
        if created == 0 {
            return Err(LayerError::WindowsProcessCreation(WindowsError::last_error()));
        }

        let process = Self {
            process_info,
            terminate_on_drop: true,
        };
        tracing::info!(pid = process.dwProcessId, program, "process created");

        // An injection failure must not leave a suspended orphan behind, dropping terminates it.
        inject_layer(process.dwProcessId, dll_path)?;
        unsafe { resume_thread(process.hThread) }?;

        Ok(process)
    }

    /// Waits for the process to exit and returns its exit code.
    pub fn wait_until_exit(mut self) -> LayerResult<u32> {
        if unsafe { WaitForSingleObject(self.hProcess, INFINITE) } != WAIT_OBJECT_0 {
            return Err(LayerError::WindowsProcessCreation(WindowsError::last_error()));
        }
        self.terminate_on_drop = false;

        let mut exit_code = 0u32;
        if unsafe { GetExitCodeProcess(self.hProcess, &mut exit_code) } == 0 {
            return Err(LayerError::WindowsProcessCreation(WindowsError::last_error()));
        }

        Ok(exit_code)
    }
}

impl Deref for LayeredProcess {
    type Target = PROCESS_INFORMATION;

    fn deref(&self) -> &Self::Target {
        &self.process_info
    }
}

impl Drop for LayeredProcess {
    fn drop(&mut self) {
        unsafe {
            if self.terminate_on_drop {
                TerminateProcess(self.process_info.hProcess, 1);
            }
            CloseHandle(self.process_info.hProcess);
            CloseHandle(self.process_info.hThread);
        }
    }
}
