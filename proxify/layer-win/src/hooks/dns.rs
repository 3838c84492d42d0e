//! Hooks on name resolution, handing out fake addresses for hostnames.
//!
//! The real resolver still runs, but on the fake address literal, so the application receives an
//! `ADDRINFO` list allocated (and later freed) by Winsock itself.

use std::{
    ffi::{CStr, c_char},
    net::Ipv4Addr,
    sync::OnceLock,
};

use proxify_layer_lib::{
    error::LayerResult,
    setup::layer_setup,
    str_win::{string_to_u8_buffer, string_to_u16_buffer, u16_ptr_to_string},
};
use winapi::{
    shared::{
        minwindef::INT,
        ws2def::{ADDRINFOA, ADDRINFOW, AF_INET6},
    },
    um::winsock2::WSAEFAULT,
};

use crate::{apply_hook, engine::Registry};

type GetAddrInfoType = unsafe extern "system" fn(
    node_name: *const c_char,
    service_name: *const c_char,
    hints: *const ADDRINFOA,
    result: *mut *mut ADDRINFOA,
) -> INT;
static GET_ADDR_INFO_ORIGINAL: OnceLock<GetAddrInfoType> = OnceLock::new();

type GetAddrInfoWType = unsafe extern "system" fn(
    node_name: *const u16,
    service_name: *const u16,
    hints: *const ADDRINFOW,
    result: *mut *mut ADDRINFOW,
) -> INT;
static GET_ADDR_INFO_W_ORIGINAL: OnceLock<GetAddrInfoWType> = OnceLock::new();

/// Fake address to resolve in place of `node`.
///
/// Lookups restricted to IPv6 are left alone, a fake IPv4 literal can't satisfy them.
fn fake_node(node: Option<String>, family: Option<i32>) -> Option<Ipv4Addr> {
    let setup = layer_setup()?;
    let node = node?;

    if family == Some(AF_INET6) {
        tracing::trace!(%node, "IPv6 only lookup resolved as-is");
        return None;
    }

    setup
        .name_rewriter()
        .rewrite(&node)
        .inspect_err(|bypass| tracing::trace!(%node, %bypass, "resolved as-is"))
        .ok()
}

unsafe extern "system" fn getaddrinfo_detour(
    raw_node: *const c_char,
    raw_service: *const c_char,
    raw_hints: *const ADDRINFOA,
    out_addr_info: *mut *mut ADDRINFOA,
) -> INT {
    let Some(&original) = GET_ADDR_INFO_ORIGINAL.get() else {
        return WSAEFAULT;
    };

    // Names that aren't valid UTF-8 can't be sent to a proxy anyway.
    let node = (!raw_node.is_null())
        .then(|| unsafe { CStr::from_ptr(raw_node) }.to_str().ok().map(String::from))
        .flatten();
    let family = unsafe { raw_hints.as_ref() }.map(|hints| hints.ai_family);

    match fake_node(node, family) {
        Some(fake) => {
            let fake = string_to_u8_buffer(fake.to_string());
            unsafe { original(fake.as_ptr() as _, raw_service, raw_hints, out_addr_info) }
        }
        None => unsafe { original(raw_node, raw_service, raw_hints, out_addr_info) },
    }
}

unsafe extern "system" fn get_addr_info_w_detour(
    raw_node: *const u16,
    raw_service: *const u16,
    raw_hints: *const ADDRINFOW,
    out_addr_info: *mut *mut ADDRINFOW,
) -> INT {
    let Some(&original) = GET_ADDR_INFO_W_ORIGINAL.get() else {
        return WSAEFAULT;
    };

    let node = unsafe { u16_ptr_to_string(raw_node) };
    let family = unsafe { raw_hints.as_ref() }.map(|hints| hints.ai_family);

    match fake_node(node, family) {
        Some(fake) => {
            let fake = string_to_u16_buffer(fake.to_string());
            unsafe { original(fake.as_ptr(), raw_service, raw_hints, out_addr_info) }
        }
        None => unsafe { original(raw_node, raw_service, raw_hints, out_addr_info) },
    }
}

pub fn initialize_hooks(registry: &mut Registry) -> LayerResult<()> {
    apply_hook!(
        registry,
        "ws2_32",
        "getaddrinfo",
        getaddrinfo_detour,
        GetAddrInfoType,
        GET_ADDR_INFO_ORIGINAL
    )?;
    apply_hook!(
        registry,
        "ws2_32",
        "GetAddrInfoW",
        get_addr_info_w_detour,
        GetAddrInfoWType,
        GET_ADDR_INFO_W_ORIGINAL
    )?;

    Ok(())
}
