//! Module and export lookup.

use std::{ffi::c_void, path::PathBuf, ptr};

use proxify_layer_lib::str_win::{string_to_u8_buffer, string_to_u16_buffer, u16_buffer_to_string};
use winapi::um::libloaderapi::{
    GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS, GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
    GetModuleFileNameW, GetModuleHandleExW, GetModuleHandleW, GetProcAddress, LoadLibraryW,
};

/// Base address of `module`, loading it if the process hasn't yet.
///
/// A suspended child has only `ntdll` and `kernel32` mapped when the layer arrives, so the
/// Winsock modules usually have to be loaded here.
pub fn get_module_base<T: AsRef<str>>(module: T) -> Option<*mut c_void> {
    let module = string_to_u16_buffer(module);

    let mut base = unsafe { GetModuleHandleW(module.as_ptr()) };
    if base.is_null() {
        base = unsafe { LoadLibraryW(module.as_ptr()) };
    }

    (!base.is_null()).then_some(base as *mut c_void)
}

/// Address of `export` in `module`.
pub fn get_export<T: AsRef<str>, U: AsRef<str>>(module: T, export: U) -> Option<*mut c_void> {
    let module = get_module_base(module)?;
    let export = string_to_u8_buffer(export);

    let address = unsafe { GetProcAddress(module as _, export.as_ptr() as _) };
    (!address.is_null()).then_some(address as *mut c_void)
}

/// Path of the module containing `address`.
pub fn module_path_from_address(address: *const c_void) -> Option<PathBuf> {
    let mut module = ptr::null_mut();

    let found = unsafe {
        GetModuleHandleExW(
            GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
            address as _,
            &mut module,
        )
    };
    if found == 0 {
        return None;
    }

    let mut name = [0u16; 1024];
    let len = unsafe { GetModuleFileNameW(module, name.as_mut_ptr(), name.len() as _) };
    if len == 0 || len as usize >= name.len() {
        return None;
    }

    Some(PathBuf::from(u16_buffer_to_string(&name[..len as usize])))
}

/// Path of this DLL, which is what gets injected into children.
pub fn current_module_path() -> Option<PathBuf> {
    module_path_from_address(current_module_path as *const c_void)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn finds_winsock_exports() {
        assert!(get_export("ws2_32", "connect").is_some());
        assert!(get_export("ws2_32", "DefinitelyNotAnExport").is_none());
        assert!(get_export("no-such-module-proxify", "connect").is_none());
    }

    #[rstest]
    fn current_module_has_a_path() {
        let path = current_module_path().unwrap();

        assert!(path.is_absolute());
    }
}
