//! Hooks on the Winsock connect and send paths.

pub(crate) mod state;
pub(crate) mod utils;

use std::sync::OnceLock;

use proxify_layer_lib::{
    datagram::DatagramVerdict,
    detour::{Bypass, Detour},
    error::{LayerResult, RedirectError},
    redirect::{Redirected, RedirectSocket, SocketStream},
    selector::BlockReason,
    setup::layer_setup,
};
use winapi::{
    ctypes::{c_char, c_void},
    shared::{
        guiddef::{GUID, IsEqualGUID},
        minwindef::{BOOL, DWORD, FALSE, INT, LPDWORD, LPVOID, TRUE},
        ws2def::{LPWSABUF, SIO_GET_EXTENSION_FUNCTION_POINTER, SOCKADDR},
    },
    um::{
        minwinbase::LPOVERLAPPED,
        mswsock::{LPFN_CONNECTEX, WSAID_CONNECTEX},
        synchapi::SetEvent,
        winsock2::{
            FIONBIO, LPQOS, LPWSAOVERLAPPED, LPWSAOVERLAPPED_COMPLETION_ROUTINE, SOCKET,
            SOCKET_ERROR, WSAEFAULT, WSASetLastError,
        },
    },
};

use self::{
    state::NON_BLOCKING,
    utils::{WinSocket, socket_addr_from_raw},
};
use crate::{apply_hook, engine::Registry};

type ConnectType = unsafe extern "system" fn(s: SOCKET, name: *const SOCKADDR, namelen: INT) -> INT;
pub(crate) static CONNECT_ORIGINAL: OnceLock<ConnectType> = OnceLock::new();

type WSAConnectType = unsafe extern "system" fn(
    s: SOCKET,
    name: *const SOCKADDR,
    namelen: INT,
    lpCallerData: LPWSABUF,
    lpCalleeData: LPWSABUF,
    lpSQOS: LPQOS,
    lpGQOS: LPQOS,
) -> INT;
static WSA_CONNECT_ORIGINAL: OnceLock<WSAConnectType> = OnceLock::new();

type WSAIoctlType = unsafe extern "system" fn(
    s: SOCKET,
    dwIoControlCode: DWORD,
    lpvInBuffer: LPVOID,
    cbInBuffer: DWORD,
    lpvOutBuffer: LPVOID,
    cbOutBuffer: DWORD,
    lpcbBytesReturned: LPDWORD,
    lpOverlapped: LPWSAOVERLAPPED,
    lpCompletionRoutine: LPWSAOVERLAPPED_COMPLETION_ROUTINE,
) -> INT;
static WSA_IOCTL_ORIGINAL: OnceLock<WSAIoctlType> = OnceLock::new();

type ConnectExType = unsafe extern "system" fn(
    s: SOCKET,
    name: *const SOCKADDR,
    namelen: INT,
    lpSendBuffer: *mut c_void,
    dwSendDataLength: DWORD,
    lpdwBytesSent: LPDWORD,
    lpOverlapped: LPOVERLAPPED,
) -> BOOL;
/// Not a MinHook hook: captured from `WSAIoctl` when the application asks for `ConnectEx`.
static CONNECTEX_ORIGINAL: OnceLock<ConnectExType> = OnceLock::new();

type IoCtlSocketType = unsafe extern "system" fn(s: SOCKET, cmd: i32, argp: *mut u32) -> INT;
pub(crate) static IOCTL_SOCKET_ORIGINAL: OnceLock<IoCtlSocketType> = OnceLock::new();

type CloseSocketType = unsafe extern "system" fn(s: SOCKET) -> INT;
static CLOSE_SOCKET_ORIGINAL: OnceLock<CloseSocketType> = OnceLock::new();

type SendToType = unsafe extern "system" fn(
    s: SOCKET,
    buf: *const c_char,
    len: INT,
    flags: INT,
    to: *const SOCKADDR,
    tolen: INT,
) -> INT;
static SEND_TO_ORIGINAL: OnceLock<SendToType> = OnceLock::new();

type WSASendToType = unsafe extern "system" fn(
    s: SOCKET,
    lpBuffers: LPWSABUF,
    dwBufferCount: DWORD,
    lpNumberOfBytesSent: LPDWORD,
    dwFlags: DWORD,
    lpTo: *const SOCKADDR,
    iTolen: INT,
    lpOverlapped: LPWSAOVERLAPPED,
    lpCompletionRoutine: LPWSAOVERLAPPED_COMPLETION_ROUTINE,
) -> INT;
static WSA_SEND_TO_ORIGINAL: OnceLock<WSASendToType> = OnceLock::new();

/// Sets the Winsock last error and returns `failure`.
fn fail_with<T>(code: i32, failure: T) -> T {
    unsafe { WSASetLastError(code) };
    failure
}

/// Shared by every connect flavour.
///
/// # Safety
///
/// `name` must be null or point to `namelen` readable bytes.
unsafe fn redirect_connect(s: SOCKET, name: *const SOCKADDR, namelen: INT) -> Detour<Redirected> {
    let Some(setup) = layer_setup() else {
        return Detour::Bypass(Bypass::NotInitialized);
    };
    let Some(destination) = (unsafe { socket_addr_from_raw(name, namelen) }) else {
        return Detour::Bypass(Bypass::AddressConversion);
    };

    setup
        .redirector()
        .connect(&WinSocket(s), destination, NON_BLOCKING.is_nonblocking(s))
}

fn log_bypass(function: &str, s: SOCKET, bypass: &Bypass) {
    tracing::trace!(function, socket = s, %bypass, "calling original");
}

fn log_failure(function: &str, s: SOCKET, error: &RedirectError) -> i32 {
    tracing::debug!(function, socket = s, %error, "connect failed");
    error.wsa_error_code()
}

unsafe extern "system" fn connect_detour(s: SOCKET, name: *const SOCKADDR, namelen: INT) -> INT {
    let Some(&original) = CONNECT_ORIGINAL.get() else {
        return fail_with(WSAEFAULT, SOCKET_ERROR);
    };

    unsafe { redirect_connect(s, name, namelen) }.unwrap_or_bypass_with(
        |_| 0,
        |bypass| {
            log_bypass("connect", s, &bypass);
            unsafe { original(s, name, namelen) }
        },
        |error| fail_with(log_failure("connect", s, &error), SOCKET_ERROR),
    )
}

unsafe extern "system" fn wsa_connect_detour(
    s: SOCKET,
    name: *const SOCKADDR,
    namelen: INT,
    lpCallerData: LPWSABUF,
    lpCalleeData: LPWSABUF,
    lpSQOS: LPQOS,
    lpGQOS: LPQOS,
) -> INT {
    let Some(&original) = WSA_CONNECT_ORIGINAL.get() else {
        return fail_with(WSAEFAULT, SOCKET_ERROR);
    };

    unsafe { redirect_connect(s, name, namelen) }.unwrap_or_bypass_with(
        |_| 0,
        |bypass| {
            log_bypass("WSAConnect", s, &bypass);
            unsafe { original(s, name, namelen, lpCallerData, lpCalleeData, lpSQOS, lpGQOS) }
        },
        |error| fail_with(log_failure("WSAConnect", s, &error), SOCKET_ERROR),
    )
}

/// Sends the `ConnectEx` payload and reports the operation as completed.
///
/// # Safety
///
/// Pointers as received by `ConnectEx`.
unsafe fn complete_connectex(
    socket: WinSocket,
    send_buffer: *mut c_void,
    send_length: DWORD,
    bytes_sent: LPDWORD,
    overlapped: LPOVERLAPPED,
) -> BOOL {
    let mut sent = 0;

    if !send_buffer.is_null() && send_length > 0 {
        let payload =
            unsafe { std::slice::from_raw_parts(send_buffer as *const u8, send_length as usize) };

        if let Err(error) = std::io::Write::write_all(&mut SocketStream(&socket), payload) {
            tracing::warn!(socket = socket.0, %error, "ConnectEx payload not sent");
            let code = error.raw_os_error().unwrap_or(WSAEFAULT);
            return fail_with(code, FALSE);
        }
        sent = send_length;
    }

    if !bytes_sent.is_null() {
        unsafe { *bytes_sent = sent };
    }

    if !overlapped.is_null() {
        unsafe {
            (*overlapped).Internal = 0;
            (*overlapped).InternalHigh = sent as _;
            if !(*overlapped).hEvent.is_null() {
                SetEvent((*overlapped).hEvent);
            }
        }
    }

    TRUE
}

/// Redirected `ConnectEx` calls complete synchronously. Sockets bound to a completion port get
/// no completion packet for them.
unsafe extern "system" fn connectex_detour(
    s: SOCKET,
    name: *const SOCKADDR,
    namelen: INT,
    lpSendBuffer: *mut c_void,
    dwSendDataLength: DWORD,
    lpdwBytesSent: LPDWORD,
    lpOverlapped: LPOVERLAPPED,
) -> BOOL {
    let Some(&original) = CONNECTEX_ORIGINAL.get() else {
        tracing::error!("ConnectEx called before its address was captured");
        return fail_with(WSAEFAULT, FALSE);
    };

    unsafe { redirect_connect(s, name, namelen) }.unwrap_or_bypass_with(
        |redirected| {
            tracing::debug!(socket = s, target = %redirected.target, "ConnectEx redirected");
            unsafe {
                complete_connectex(
                    WinSocket(s),
                    lpSendBuffer,
                    dwSendDataLength,
                    lpdwBytesSent,
                    lpOverlapped,
                )
            }
        },
        |bypass| {
            log_bypass("ConnectEx", s, &bypass);
            unsafe {
                original(
                    s,
                    name,
                    namelen,
                    lpSendBuffer,
                    dwSendDataLength,
                    lpdwBytesSent,
                    lpOverlapped,
                )
            }
        },
        |error| fail_with(log_failure("ConnectEx", s, &error), FALSE),
    )
}

/// Swaps the `ConnectEx` pointer returned by `SIO_GET_EXTENSION_FUNCTION_POINTER` for
/// [`connectex_detour`], keeping the real one.
///
/// # Safety
///
/// Buffers as received by (and already filled by) `WSAIoctl`.
unsafe fn capture_connectex(
    in_buffer: LPVOID,
    in_length: DWORD,
    out_buffer: LPVOID,
    out_length: DWORD,
) {
    if in_buffer.is_null() || (in_length as usize) < std::mem::size_of::<GUID>() {
        return;
    }

    let requested = unsafe { &*(in_buffer as *const GUID) };
    if !IsEqualGUID(requested, &WSAID_CONNECTEX) {
        return;
    }

    if out_buffer.is_null() || (out_length as usize) < std::mem::size_of::<LPFN_CONNECTEX>() {
        tracing::warn!(out_length, "ConnectEx output buffer too small");
        return;
    }

    let slot = out_buffer as *mut LPFN_CONNECTEX;
    let Some(connectex) = (unsafe { *slot }) else {
        return;
    };

    // Every provider hands out the same function; the first one wins.
    let _ = CONNECTEX_ORIGINAL.set(connectex);

    unsafe { *slot = Some(connectex_detour) };
    tracing::debug!("ConnectEx captured");
}

unsafe extern "system" fn wsa_ioctl_detour(
    s: SOCKET,
    dwIoControlCode: DWORD,
    lpvInBuffer: LPVOID,
    cbInBuffer: DWORD,
    lpvOutBuffer: LPVOID,
    cbOutBuffer: DWORD,
    lpcbBytesReturned: LPDWORD,
    lpOverlapped: LPWSAOVERLAPPED,
    lpCompletionRoutine: LPWSAOVERLAPPED_COMPLETION_ROUTINE,
) -> INT {
    let Some(&original) = WSA_IOCTL_ORIGINAL.get() else {
        return fail_with(WSAEFAULT, SOCKET_ERROR);
    };

    let result = unsafe {
        original(
            s,
            dwIoControlCode,
            lpvInBuffer,
            cbInBuffer,
            lpvOutBuffer,
            cbOutBuffer,
            lpcbBytesReturned,
            lpOverlapped,
            lpCompletionRoutine,
        )
    };

    if result == 0
        && dwIoControlCode == SIO_GET_EXTENSION_FUNCTION_POINTER
        && layer_setup().is_some()
    {
        unsafe { capture_connectex(lpvInBuffer, cbInBuffer, lpvOutBuffer, cbOutBuffer) };
    }

    result
}

unsafe extern "system" fn ioctlsocket_detour(s: SOCKET, cmd: i32, argp: *mut u32) -> INT {
    let Some(&original) = IOCTL_SOCKET_ORIGINAL.get() else {
        return fail_with(WSAEFAULT, SOCKET_ERROR);
    };

    let result = unsafe { original(s, cmd, argp) };

    if result == 0 && cmd == FIONBIO && !argp.is_null() {
        NON_BLOCKING.set(s, unsafe { *argp } != 0);
    }

    result
}

unsafe extern "system" fn closesocket_detour(s: SOCKET) -> INT {
    let Some(&original) = CLOSE_SOCKET_ORIGINAL.get() else {
        return fail_with(WSAEFAULT, SOCKET_ERROR);
    };

    NON_BLOCKING.set(s, false);
    unsafe { original(s) }
}

/// Why a datagram from `s` to `to` must not leave, if it must not.
///
/// # Safety
///
/// `to` must be null or point to `tolen` readable bytes.
unsafe fn datagram_rejection(s: SOCKET, to: *const SOCKADDR, tolen: INT) -> Option<BlockReason> {
    let setup = layer_setup()?;

    let destination = if to.is_null() {
        None
    } else {
        Some(unsafe { socket_addr_from_raw(to, tolen) }?)
    };

    match setup.datagram_policy().check(destination) {
        DatagramVerdict::Allow => None,
        // The destination of a stream send is ignored by Winsock.
        DatagramVerdict::Reject(_) if matches!(WinSocket(s).stream_kind(), Ok(Ok(()))) => None,
        DatagramVerdict::Reject(reason) => {
            tracing::debug!(socket = s, ?destination, %reason, "datagram rejected");
            Some(reason)
        }
    }
}

unsafe extern "system" fn sendto_detour(
    s: SOCKET,
    buf: *const c_char,
    len: INT,
    flags: INT,
    to: *const SOCKADDR,
    tolen: INT,
) -> INT {
    let Some(&original) = SEND_TO_ORIGINAL.get() else {
        return fail_with(WSAEFAULT, SOCKET_ERROR);
    };

    match unsafe { datagram_rejection(s, to, tolen) } {
        Some(reason) => fail_with(
            RedirectError::PolicyBlock(reason).wsa_error_code(),
            SOCKET_ERROR,
        ),
        None => unsafe { original(s, buf, len, flags, to, tolen) },
    }
}

unsafe extern "system" fn wsa_send_to_detour(
    s: SOCKET,
    lpBuffers: LPWSABUF,
    dwBufferCount: DWORD,
    lpNumberOfBytesSent: LPDWORD,
    dwFlags: DWORD,
    lpTo: *const SOCKADDR,
    iTolen: INT,
    lpOverlapped: LPWSAOVERLAPPED,
    lpCompletionRoutine: LPWSAOVERLAPPED_COMPLETION_ROUTINE,
) -> INT {
    let Some(&original) = WSA_SEND_TO_ORIGINAL.get() else {
        return fail_with(WSAEFAULT, SOCKET_ERROR);
    };

    match unsafe { datagram_rejection(s, lpTo, iTolen) } {
        Some(reason) => fail_with(
            RedirectError::PolicyBlock(reason).wsa_error_code(),
            SOCKET_ERROR,
        ),
        None => unsafe {
            original(
                s,
                lpBuffers,
                dwBufferCount,
                lpNumberOfBytesSent,
                dwFlags,
                lpTo,
                iTolen,
                lpOverlapped,
                lpCompletionRoutine,
            )
        },
    }
}

pub fn initialize_hooks(registry: &mut Registry) -> LayerResult<()> {
    apply_hook!(registry, "ws2_32", "connect", connect_detour, ConnectType, CONNECT_ORIGINAL)?;
    apply_hook!(
        registry,
        "ws2_32",
        "WSAConnect",
        wsa_connect_detour,
        WSAConnectType,
        WSA_CONNECT_ORIGINAL
    )?;
    apply_hook!(
        registry,
        "ws2_32",
        "WSAIoctl",
        wsa_ioctl_detour,
        WSAIoctlType,
        WSA_IOCTL_ORIGINAL
    )?;
    apply_hook!(
        registry,
        "ws2_32",
        "ioctlsocket",
        ioctlsocket_detour,
        IoCtlSocketType,
        IOCTL_SOCKET_ORIGINAL
    )?;
    apply_hook!(
        registry,
        "ws2_32",
        "closesocket",
        closesocket_detour,
        CloseSocketType,
        CLOSE_SOCKET_ORIGINAL
    )?;
    apply_hook!(registry, "ws2_32", "sendto", sendto_detour, SendToType, SEND_TO_ORIGINAL)?;
    apply_hook!(
        registry,
        "ws2_32",
        "WSASendTo",
        wsa_send_to_detour,
        WSASendToType,
        WSA_SEND_TO_ORIGINAL
    )?;

    Ok(())
}
