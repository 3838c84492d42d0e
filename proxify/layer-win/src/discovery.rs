//! Reads the user's system proxy (Internet Options).

use std::mem;

use proxify_layer_lib::str_win::u16_ptr_to_string;
use winapi::{
    shared::ntdef::LPWSTR,
    um::{
        winbase::GlobalFree,
        winhttp::{WINHTTP_CURRENT_USER_IE_PROXY_CONFIG, WinHttpGetIEProxyConfigForCurrentUser},
    },
};

/// Frees a string allocated by WinHTTP.
fn take_string(string: LPWSTR) -> Option<String> {
    if string.is_null() {
        return None;
    }

    let value = unsafe { u16_ptr_to_string(string) };
    unsafe { GlobalFree(string as _) };
    value
}

/// The raw proxy string of the current user, e.g. `127.0.0.1:7890` or
/// `http=proxy:80;https=proxy:80;socks=proxy:1080`.
///
/// `None` when no manual proxy is configured. Auto-config (PAC) is not evaluated.
pub fn system_proxy_string() -> Option<String> {
    let mut config: WINHTTP_CURRENT_USER_IE_PROXY_CONFIG = unsafe { mem::zeroed() };

    if unsafe { WinHttpGetIEProxyConfigForCurrentUser(&mut config) } == 0 {
        tracing::debug!("no system proxy configuration");
        return None;
    }

    let proxy = take_string(config.lpszProxy);
    let auto_config_url = take_string(config.lpszAutoConfigUrl);
    let _ = take_string(config.lpszProxyBypass);

    if let Some(url) = auto_config_url {
        tracing::info!(url, "proxy auto-config is ignored");
    }

    proxy.filter(|proxy| !proxy.trim().is_empty())
}
